//! JSON text messages exchanged on the dashboard websocket.
//!
//! Every frame is an object with a `type` tag and an optional `data` payload;
//! the server also stamps a `timestamp` string which the client ignores.

#[cfg(test)]
#[path = "live_message_test.rs"]
mod live_message_test;

use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no type")]
    MissingType,
    #[error("stats_update data is not an object")]
    InvalidStatsPayload,
}

/// A decoded inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveMessage {
    /// Partial snapshot to merge.
    StatsUpdate(Map<String, Value>),
    NewPost(Value),
    SentimentAlert(Value),
    Ping,
    Pong,
    /// Any other type tag; carried for logging only.
    Other(String),
}

impl LiveMessage {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::StatsUpdate(_) => "stats_update",
            Self::NewPost(_) => "new_post",
            Self::SentimentAlert(_) => "sentiment_alert",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Other(kind) => kind,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns [`MessageError`] for invalid JSON, a missing `type`, or a
/// `stats_update` whose `data` is not an object.
pub fn parse_message(text: &str) -> Result<LiveMessage, MessageError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let kind = envelope.kind.ok_or(MessageError::MissingType)?;
    let message = match kind.as_str() {
        "stats_update" => match envelope.data {
            Value::Object(patch) => LiveMessage::StatsUpdate(patch),
            _ => return Err(MessageError::InvalidStatsPayload),
        },
        "new_post" => LiveMessage::NewPost(envelope.data),
        "sentiment_alert" => LiveMessage::SentimentAlert(envelope.data),
        "ping" => LiveMessage::Ping,
        "pong" => LiveMessage::Pong,
        _ => LiveMessage::Other(kind),
    };
    Ok(message)
}

/// Ask the server to push a fresh stats snapshot.
#[must_use]
pub fn request_update_message() -> String {
    json!({ "type": "request_update" }).to_string()
}

#[must_use]
pub fn pong_message(now_ms: i64) -> String {
    json!({ "type": "pong", "timestamp": now_ms }).to_string()
}
