//! JSON command envelope spoken by the demo binary.
//!
//! Clients send `{"id": "...", "command": "subscribe", "topic": "..."}`
//! style requests; every request gets one JSON reply. Frames that are not
//! valid JSON commands are echoed back unchanged by the binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::WebSocket;

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Request {
    /// Client-chosen correlation id, echoed in the reply.
    #[serde(default)]
    pub id: String,
    /// The command to run.
    #[serde(flatten)]
    pub command: Command,
}

/// Commands understood by the demo server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Subscribe to a topic filter.
    Subscribe {
        /// Topic or filter (`+` and `#` allowed).
        topic: String,
    },
    /// Unsubscribe from a topic filter.
    Unsubscribe {
        /// Topic or filter.
        topic: String,
    },
    /// Unsubscribe from every topic.
    UnsubscribeAll,
    /// Publish a text message to every other subscriber.
    Publish {
        /// Target topic.
        topic: String,
        /// Message body.
        message: String,
    },
}

/// Reply kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// The command ran.
    Response,
    /// The command could not be parsed.
    Error,
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the request (empty for parse errors).
    pub id: String,
    /// Reply kind.
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    /// When the reply was produced.
    pub timestamp: DateTime<Utc>,
    /// Command-specific body.
    pub payload: serde_json::Value,
}

impl Reply {
    fn response(id: String, payload: serde_json::Value) -> Self {
        Self {
            id,
            kind: ReplyKind::Response,
            timestamp: Utc::now(),
            payload,
        }
    }

    fn error(message: &str) -> Self {
        Self {
            id: String::new(),
            kind: ReplyKind::Error,
            timestamp: Utc::now(),
            payload: serde_json::json!({ "code": 400, "message": message }),
        }
    }
}

/// Parses `text` as a [`Request`].
///
/// Returns `None` for anything that is not a JSON object, so plain text
/// can be echoed instead.
#[must_use]
pub fn parse(text: &str) -> Option<Result<Request, Reply>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if !value.is_object() {
        return None;
    }
    Some(serde_json::from_value(value).map_err(|err| Reply::error(&err.to_string())))
}

/// Runs `request` against `ws` and builds the reply.
pub fn execute(ws: &WebSocket, request: Request) -> Reply {
    let payload = match request.command {
        Command::Subscribe { topic } => {
            ws.subscribe(&topic);
            serde_json::json!({ "subscribed": topic, "topics": ws.topics() })
        }
        Command::Unsubscribe { topic } => {
            let removed = ws.unsubscribe(&topic);
            serde_json::json!({ "unsubscribed": topic, "removed": removed, "topics": ws.topics() })
        }
        Command::UnsubscribeAll => {
            ws.unsubscribe_all();
            serde_json::json!({ "topics": ws.topics() })
        }
        Command::Publish { topic, message } => {
            ws.publish(&topic, message, false);
            serde_json::json!({ "published": topic })
        }
    };
    Reply::response(request.id, payload)
}

/// Serializes a reply; falls back to an empty object.
#[must_use]
pub fn to_text(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|_| "{}".to_string())
}
