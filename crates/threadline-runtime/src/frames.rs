//! Client-facing stream frames.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataFrame {
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl DataFrame {
    pub fn text(author: impl Into<String>, content: impl Into<String>, is_thought: bool) -> Self {
        Self {
            author: author.into(),
            content: Some(content.into()),
            is_thought: Some(is_thought),
            images: None,
        }
    }

    pub fn images(author: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            author: author.into(),
            content: None,
            is_thought: None,
            images: Some(images),
        }
    }
}

/// One server-sent event: a name plus a JSON payload.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamFrame {
    Data(DataFrame),
    Heartbeat { timestamp: i64 },
    Error { error: String },
    Stop,
}

impl StreamFrame {
    pub fn heartbeat_now() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
            Self::Stop => "stop",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Data(frame) => serde_json::to_value(frame).unwrap_or(Value::Null),
            Self::Heartbeat { timestamp } => json!({ "timestamp": timestamp }),
            Self::Error { error } => json!({ "error": error }),
            Self::Stop => json!({ "status": "done" }),
        }
    }
}
