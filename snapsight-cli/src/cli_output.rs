// ABOUTME: Centralized CLI output utilities for consistent user-facing messages
// ABOUTME: Provides colored status lines, error reports with SDK help text, and progress spinners

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use snapsight_sdk::SnapError;
use std::io::IsTerminal;
use std::time::Duration;

use crate::constants::timeouts::PROGRESS_BAR_TICK_MS;

/// Centralized CLI output utilities for consistent formatting
pub struct CliOutput {
    use_color: bool,
}

impl CliOutput {
    /// Create new CLI output utility with TTY detection
    pub fn new() -> Self {
        Self {
            use_color: std::io::stderr().is_terminal(),
        }
    }

    /// Create CLI output utility with explicit color setting
    pub fn with_color(use_color: bool) -> Self {
        Self { use_color }
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Display an error message
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.error_line(message));
    }

    fn error_line(&self, message: &str) -> String {
        if self.use_color {
            format!("{} {}", "error:".red().bold(), message)
        } else {
            format!("error: {}", message)
        }
    }

    /// Display a warning message
    pub fn warning(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "warning:".yellow().bold(), message);
        } else {
            eprintln!("warning: {}", message);
        }
    }

    /// Display an informational message
    pub fn info(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "info:".blue().bold(), message);
        } else {
            eprintln!("info: {}", message);
        }
    }

    /// Display a success message
    pub fn success(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "success:".green().bold(), message);
        } else {
            eprintln!("success: {}", message);
        }
    }

    /// Print a failed command with its context chain and, for SDK errors, a hint
    pub fn report(&self, error: &anyhow::Error) {
        for line in self.report_lines(error) {
            eprintln!("{}", line);
        }
    }

    pub fn report_lines(&self, error: &anyhow::Error) -> Vec<String> {
        let mut lines = vec![self.error_line(&format!("{:#}", error))];
        let hint = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<SnapError>())
            .and_then(SnapError::help_text);
        if let Some(hint) = hint {
            if self.use_color {
                lines.push(format!("{} {}", "hint:".cyan(), hint));
            } else {
                lines.push(format!("hint: {}", hint));
            }
        }
        lines
    }

    /// Spinner on stderr; hidden when stderr is not a terminal
    pub fn spinner(&self, message: impl Into<String>) -> ProgressBar {
        if !std::io::stderr().is_terminal() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        let template = if self.use_color {
            "{spinner:.green} {msg}"
        } else {
            "{spinner} {msg}"
        };
        if let Ok(style) = ProgressStyle::default_spinner().template(template) {
            pb.set_style(style);
        }
        pb.set_message(message.into());
        pb.enable_steady_tick(Duration::from_millis(PROGRESS_BAR_TICK_MS));
        pb
    }
}

impl Default for CliOutput {
    fn default() -> Self {
        Self::new()
    }
}
