use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conversation role attached to a [`Content`] payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One fragment of an event's content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thought")]
    Thought { text: String },
    #[serde(rename = "inline_data")]
    InlineData {
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        name: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    #[serde(rename = "function_response")]
    FunctionResponse {
        name: String,
        #[serde(default)]
        response: Map<String, Value>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self::Thought { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::InlineData {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn is_function_response(&self) -> bool {
        matches!(self, Self::FunctionResponse { .. })
    }

    /// Text carried by a text or thought part.
    pub fn as_text(&self) -> Option<(&str, bool)> {
        match self {
            Self::Text { text } => Some((text, false)),
            Self::Thought { text } => Some((text, true)),
            _ => None,
        }
    }

    /// Image strings embedded in a function response under `images`.
    pub fn response_images(&self) -> Vec<String> {
        let Self::FunctionResponse { response, .. } = self else {
            return Vec::new();
        };
        response
            .get("images")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Images from a function response that reported `success: true`.
    pub fn delivered_images(&self) -> Vec<String> {
        let Self::FunctionResponse { response, .. } = self else {
            return Vec::new();
        };
        if response.get("success").and_then(Value::as_bool) != Some(true) {
            return Vec::new();
        }
        self.response_images()
    }
}

/// Role plus ordered parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub fn has_function_response(&self) -> bool {
        self.parts.iter().any(Part::is_function_response)
    }

    /// Concatenated plain text, thoughts excluded.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Binary payloads travel as standard base64 strings in JSON.
mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
