use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{Content, Part, Role};
use crate::ids::EventId;

/// Who produced an event.
///
/// Serialized as a bare string: `"user"`, `"tool_result"`, or the agent name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Author {
    User,
    /// Sentinel used for function outputs fed back into the run.
    ToolResult,
    Agent(String),
}

impl Author {
    pub const USER: &'static str = "user";
    pub const TOOL_RESULT: &'static str = "tool_result";

    pub fn agent(name: impl Into<String>) -> Self {
        Self::Agent(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::User => Self::USER,
            Self::ToolResult => Self::TOOL_RESULT,
            Self::Agent(name) => name,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

impl From<String> for Author {
    fn from(s: String) -> Self {
        match s.as_str() {
            Self::USER => Self::User,
            Self::TOOL_RESULT => Self::ToolResult,
            _ => Self::Agent(s),
        }
    }
}

impl From<&str> for Author {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<Author> for String {
    fn from(a: Author) -> Self {
        match a {
            Author::Agent(name) => name,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a session's event log, also the unit an engine streams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Incremental chunk of a response still being generated.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

impl Event {
    pub fn new(author: Author, content: Option<Content>) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            author,
            content,
            partial: false,
            turn_complete: false,
        }
    }

    pub fn user_message(content: Content) -> Self {
        Self::new(Author::User, Some(content))
    }

    pub fn agent_text(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Author::agent(agent), Some(Content::model_text(text)))
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn with_turn_complete(mut self) -> Self {
        self.turn_complete = true;
        self
    }

    pub fn parts(&self) -> &[Part] {
        self.content.as_ref().map_or(&[], |c| c.parts.as_slice())
    }

    /// Unset timestamps deserialize to the Unix epoch.
    pub fn has_zero_timestamp(&self) -> bool {
        self.timestamp.timestamp() == 0 && self.timestamp.timestamp_subsec_nanos() == 0
    }

    /// A message typed by the end user, the only valid fork point.
    ///
    /// Function responses travel under the user role but belong to the
    /// agent that called the tool, so they never count.
    pub fn is_user_message(&self) -> bool {
        match &self.content {
            Some(content) => {
                content.role == Role::User
                    && self.author != Author::ToolResult
                    && !content.has_function_response()
            }
            None => false,
        }
    }
}
