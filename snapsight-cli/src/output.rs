// ABOUTME: This module handles output formatting for session events and REST responses
// ABOUTME: It provides a colored text formatter with per-mode result blocks and a JSON lines formatter

use anyhow::Result;
use owo_colors::OwoColorize;
use serde_json::json;
use snapsight_sdk::api::{ToggleResponse, UploadResponse, User};
use snapsight_sdk::{Mode, ProbeResult, SessionEvent, StopReason};

use crate::constants::ui::BORDER_LINE_LENGTH;

pub trait OutputFormat {
    /// `None` when the event is not worth showing in this format
    fn format_event(&self, event: &SessionEvent) -> Option<String>;
    fn format_probe(&self, results: &[ProbeResult], selected: Option<Mode>) -> Result<String>;
    fn format_upload(&self, mode: Mode, response: &UploadResponse) -> Result<String>;
    fn format_toggle(&self, mode: Mode, response: &ToggleResponse) -> Result<String>;
    fn format_user(&self, user: &User) -> Result<String>;
}

/// Pick the formatter for the global `--json` flag
pub fn formatter(json: bool, use_color: bool, verbose: bool) -> Box<dyn OutputFormat> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(TextFormatter::new(use_color).verbose(verbose))
    }
}

struct ResultStyle {
    icon: &'static str,
    title: &'static str,
    label_icon: &'static str,
    label: &'static str,
}

fn result_style(mode: Mode) -> ResultStyle {
    match mode {
        Mode::Calorie => ResultStyle {
            icon: "🍽️",
            title: "Calorie analysis",
            label_icon: "📊",
            label: "Analysis",
        },
        Mode::Translate => ResultStyle {
            icon: "📝",
            title: "Translation",
            label_icon: "🔤",
            label: "Text",
        },
        Mode::Navigate => ResultStyle {
            icon: "🚶",
            title: "Navigation analysis",
            label_icon: "🎯",
            label: "Advice",
        },
    }
}

fn stop_reason_text(reason: StopReason) -> &'static str {
    match reason {
        StopReason::User => "stopped by user",
        StopReason::ModeInactive => "mode is no longer active on the server",
        StopReason::ReconnectExhausted => "gave up reconnecting",
    }
}

pub struct TextFormatter {
    use_color: bool,
    verbose: bool,
}

impl TextFormatter {
    pub fn new(use_color: bool) -> Self {
        Self {
            use_color,
            verbose: false,
        }
    }

    /// Also show per-image delivery traces
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn border(&self) -> String {
        let line = "━".repeat(BORDER_LINE_LENGTH);
        if self.use_color {
            line.dimmed().to_string()
        } else {
            line
        }
    }

    pub fn result_block(&self, mode: Mode, image: Option<&str>, text: &str) -> String {
        let style = result_style(mode);
        let title = if self.use_color {
            style.title.bold().to_string()
        } else {
            style.title.to_string()
        };
        format!(
            "{} {}\n{}\n📸 Image: {}\n{} {}: {}\n{}",
            style.icon,
            title,
            self.border(),
            image.unwrap_or("unknown image"),
            style.label_icon,
            style.label,
            text,
            self.border()
        )
    }

    fn mode_name(&self, mode: Mode) -> String {
        if self.use_color {
            mode.as_str().cyan().bold().to_string()
        } else {
            mode.as_str().to_string()
        }
    }

    fn active_marker(&self, active: bool) -> String {
        match (active, self.use_color) {
            (true, true) => "active".green().to_string(),
            (false, true) => "inactive".dimmed().to_string(),
            (true, false) => "active".to_string(),
            (false, false) => "inactive".to_string(),
        }
    }
}

impl OutputFormat for TextFormatter {
    fn format_event(&self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::Connected { mode } => Some(format!(
                "📡 Connected to {} ({})",
                self.mode_name(*mode),
                mode.description()
            )),
            SessionEvent::Disconnected {
                mode,
                cause,
                reconnect_in,
            } => Some(match reconnect_in {
                Some(delay) => format!(
                    "⚠️  {} channel {}; reconnecting in {}s",
                    self.mode_name(*mode),
                    cause,
                    delay.as_secs_f32()
                ),
                None => format!("⚠️  {} channel {}", self.mode_name(*mode), cause),
            }),
            SessionEvent::Status {
                mode,
                active,
                message,
            } => Some(if message.is_empty() {
                format!("📡 {} is {}", self.mode_name(*mode), self.active_marker(*active))
            } else {
                format!(
                    "📡 {} is {}: {}",
                    self.mode_name(*mode),
                    self.active_marker(*active),
                    message
                )
            }),
            SessionEvent::Result { mode, image, text } => {
                Some(self.result_block(*mode, image.as_deref(), text))
            }
            SessionEvent::ServerError { mode, message } => {
                Some(format!("❌ {} error: {}", self.mode_name(*mode), message))
            }
            SessionEvent::Sent { key, inline } if self.verbose => Some(if *inline {
                format!("→ sent {} (inline)", key)
            } else {
                format!("→ sent {}", key)
            }),
            SessionEvent::Queued { key } if self.verbose => {
                Some(format!("… queued {} until the channel opens", key))
            }
            SessionEvent::Sent { .. } | SessionEvent::Queued { .. } => None,
            SessionEvent::DeliveryFailed { key, reason } => {
                Some(format!("❌ Could not deliver {}: {}", key, reason))
            }
            SessionEvent::Stopped { reason } => {
                Some(format!("⏹  Session {}", stop_reason_text(*reason)))
            }
        }
    }

    fn format_probe(&self, results: &[ProbeResult], selected: Option<Mode>) -> Result<String> {
        let mut lines: Vec<String> = results
            .iter()
            .map(|result| {
                format!(
                    "{:<10} {}",
                    result.mode.as_str(),
                    self.active_marker(result.active)
                )
            })
            .collect();
        lines.push(match selected {
            Some(mode) => format!("Selected mode: {}", self.mode_name(mode)),
            None => "No active mode".to_string(),
        });
        Ok(lines.join("\n"))
    }

    fn format_upload(&self, mode: Mode, response: &UploadResponse) -> Result<String> {
        let text = match response.result.as_ref().map(|r| &r.result) {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => serde_json::to_string_pretty(other)?,
            None => response
                .message
                .clone()
                .unwrap_or_else(|| response.status.clone()),
        };
        Ok(self.result_block(mode, response.file_path.as_deref(), &text))
    }

    fn format_toggle(&self, mode: Mode, response: &ToggleResponse) -> Result<String> {
        let mut line = format!(
            "{} is now {}",
            self.mode_name(mode),
            self.active_marker(response.is_active)
        );
        if !response.message.is_empty() {
            line.push_str(&format!(" ({})", response.message));
        }
        Ok(line)
    }

    fn format_user(&self, user: &User) -> Result<String> {
        let mut lines = vec![format!("Email:     {}", user.email)];
        if let Some(name) = &user.full_name {
            lines.push(format!("Name:      {}", name));
        }
        if let Some(device) = &user.device_id {
            lines.push(format!("Device:    {}", device));
        }
        lines.push(format!(
            "Account:   {}",
            if user.is_active { "active" } else { "disabled" }
        ));
        Ok(lines.join("\n"))
    }
}

/// One JSON object per line, each stamped with the time it was written
pub struct JsonFormatter;

impl JsonFormatter {
    fn line(mut value: serde_json::Value) -> String {
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "ts".to_string(),
                json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            );
        }
        value.to_string()
    }
}

impl OutputFormat for JsonFormatter {
    fn format_event(&self, event: &SessionEvent) -> Option<String> {
        let value = match event {
            SessionEvent::Connected { mode } => json!({"event": "connected", "mode": mode}),
            SessionEvent::Disconnected {
                mode,
                cause,
                reconnect_in,
            } => json!({
                "event": "disconnected",
                "mode": mode,
                "cause": cause.to_string(),
                "reconnect_in_ms": reconnect_in.map(|d| d.as_millis() as u64),
            }),
            SessionEvent::Status {
                mode,
                active,
                message,
            } => json!({"event": "status", "mode": mode, "active": active, "message": message}),
            SessionEvent::Result { mode, image, text } => {
                json!({"event": "result", "mode": mode, "image": image, "result": text})
            }
            SessionEvent::ServerError { mode, message } => {
                json!({"event": "error", "mode": mode, "message": message})
            }
            SessionEvent::Sent { key, inline } => {
                json!({"event": "sent", "key": key, "inline": inline})
            }
            SessionEvent::Queued { key } => json!({"event": "queued", "key": key}),
            SessionEvent::DeliveryFailed { key, reason } => {
                json!({"event": "delivery_failed", "key": key, "reason": reason})
            }
            SessionEvent::Stopped { reason } => json!({
                "event": "stopped",
                "reason": match reason {
                    StopReason::User => "user",
                    StopReason::ModeInactive => "mode_inactive",
                    StopReason::ReconnectExhausted => "reconnect_exhausted",
                },
            }),
        };
        Some(Self::line(value))
    }

    fn format_probe(&self, results: &[ProbeResult], selected: Option<Mode>) -> Result<String> {
        let modes: Vec<_> = results
            .iter()
            .map(|r| json!({"mode": r.mode, "active": r.active}))
            .collect();
        Ok(Self::line(json!({"event": "probe", "modes": modes, "selected": selected})))
    }

    fn format_upload(&self, mode: Mode, response: &UploadResponse) -> Result<String> {
        Ok(Self::line(json!({
            "event": "upload",
            "mode": mode,
            "response": serde_json::to_value(response)?,
        })))
    }

    fn format_toggle(&self, mode: Mode, response: &ToggleResponse) -> Result<String> {
        Ok(Self::line(json!({
            "event": "toggle",
            "mode": mode,
            "response": serde_json::to_value(response)?,
        })))
    }

    fn format_user(&self, user: &User) -> Result<String> {
        Ok(serde_json::to_string(user)?)
    }
}
