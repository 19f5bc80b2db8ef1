// ABOUTME: Wire messages exchanged over a mode channel
// ABOUTME: Tagged JSON variants for outbound image payloads and inbound status/result/error

use serde::{Deserialize, Serialize};

use crate::constants::channel::INACTIVE_PHRASES;
use crate::error::SnapError;

/// Messages the client sends to a mode channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Lightweight reference the server downloads itself
    ImageUrl { url: String, retry: u32 },
    /// Inline image content
    ImageBase64 {
        data: String,
        #[serde(
            rename = "originalUrl",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        original_url: Option<String>,
        #[serde(
            rename = "originalName",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        original_name: Option<String>,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, SnapError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages the server pushes on a mode channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Status {
        active: bool,
        #[serde(default)]
        message: String,
    },
    Result {
        result: serde_json::Value,
        #[serde(rename = "originalUrl", default, skip_serializing_if = "Option::is_none")]
        original_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Error {
        message: String,
    },
}

impl InboundMessage {
    /// Decode one text frame. Unknown `type` values and missing fields are errors.
    pub fn decode(text: &str) -> Result<Self, SnapError> {
        serde_json::from_str(text).map_err(|e| {
            SnapError::MalformedMessage(format!("{} (payload: {})", e, truncate(text, 120)))
        })
    }

    /// True for an error message saying the bound mode is no longer active
    pub fn is_inactive_signal(&self) -> bool {
        match self {
            InboundMessage::Error { message } => mentions_inactive(message),
            _ => false,
        }
    }

    /// The image reference a result refers to, if the server echoed one
    pub fn reference(&self) -> Option<&str> {
        match self {
            InboundMessage::Result {
                original_url, url, ..
            } => original_url.as_deref().or(url.as_deref()),
            _ => None,
        }
    }

    /// Result payload rendered as text; strings are returned verbatim
    pub fn result_text(&self) -> Option<String> {
        match self {
            InboundMessage::Result { result, .. } => Some(match result {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }
}

/// Whether free text carries one of the inactive phrases
pub fn mentions_inactive(text: &str) -> bool {
    let lowered = text.to_lowercase();
    INACTIVE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(&phrase.to_lowercase()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
