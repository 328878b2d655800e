//! Display-oriented history built from a raw event log.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use threadline_core::content::{Part, Role};
use threadline_core::events::{Author, Event};

use crate::input::{extract_file_names, PDF_MIME_TYPE};

const DEFAULT_INLINE_MIME_TYPE: &str = "image/png";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: DisplayRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thought: String,
    /// Data URIs, attachments first then tool-produced images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_names: Vec<String>,
}

impl HistoryMessage {
    /// Same visible payload, ignoring id and time.
    fn same_payload(&self, other: &Self) -> bool {
        self.content == other.content
            && self.thought == other.thought
            && self.images == other.images
            && self.file_names == other.file_names
    }
}

/// Merge one event's parts into a display message.
/// Returns `None` for events with nothing to show.
pub fn to_message(event: &Event) -> Option<HistoryMessage> {
    let content = event.content.as_ref()?;
    if event.partial {
        return None;
    }

    let mut text = String::new();
    let mut thought = String::new();
    let mut images = Vec::new();
    let mut file_names = Vec::new();

    for part in &content.parts {
        match part {
            Part::Text { text: raw } if !raw.is_empty() => {
                let (names, body) = extract_file_names(raw);
                if !names.is_empty() {
                    file_names = names;
                }
                text.push_str(body);
            }
            Part::Text { .. } => {}
            Part::Thought { text: raw } => thought.push_str(raw),
            Part::InlineData { mime_type, data } if !data.is_empty() => {
                let mime = match mime_type.trim() {
                    "" => DEFAULT_INLINE_MIME_TYPE,
                    m => m,
                };
                if mime.starts_with("image/") || mime == PDF_MIME_TYPE {
                    images.push(format!(
                        "data:{mime};base64,{}",
                        base64::engine::general_purpose::STANDARD.encode(data)
                    ));
                }
            }
            Part::InlineData { .. } | Part::FunctionCall { .. } => {}
            Part::FunctionResponse { .. } => images.extend(part.response_images()),
        }
    }

    if text.is_empty() && thought.is_empty() && images.is_empty() {
        return None;
    }

    let is_user = content.role == Role::User
        && event.author != Author::ToolResult
        && !content.has_function_response();

    Some(HistoryMessage {
        id: event.id.to_string(),
        timestamp: event.timestamp,
        role: if is_user { DisplayRole::User } else { DisplayRole::Assistant },
        content: text,
        thought,
        images,
        file_names,
    })
}

/// Walk the log once, oldest first.
///
/// A user message identical to the user message displayed right before it is
/// a client retry and is dropped.
pub fn build_messages(events: &[Event]) -> Vec<HistoryMessage> {
    let mut messages: Vec<HistoryMessage> = Vec::new();
    for message in events.iter().filter_map(to_message) {
        let is_retry = message.role == DisplayRole::User
            && messages
                .last()
                .is_some_and(|last| last.role == DisplayRole::User && last.same_payload(&message));
        if !is_retry {
            messages.push(message);
        }
    }
    messages
}

/// Bounds applied to raw `limit`/`offset` query values.
#[derive(Clone, Copy, Debug)]
pub struct PageLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: usize,
    pub offset: usize,
}

impl PageQuery {
    /// Missing or non-positive limits use the default; large ones are clamped.
    /// Negative offsets become 0.
    pub fn clamped(limit: Option<i64>, offset: Option<i64>, bounds: &PageLimits) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => (l as u64).min(bounds.max_limit as u64) as usize,
            _ => bounds.default_limit,
        };
        let offset = offset.filter(|o| *o > 0).map_or(0, |o| o as usize);
        Self { limit, offset }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub has_more: bool,
}

/// Newest-first window: offset 0 is the most recent `limit` items, returned
/// in chronological order.
pub fn paginate<T: Clone>(all: &[T], query: PageQuery) -> Page<T> {
    let total = all.len();
    if query.offset >= total {
        return Page {
            items: Vec::new(),
            total,
            has_more: false,
        };
    }
    let end = total - query.offset;
    let start = end.saturating_sub(query.limit);
    Page {
        items: all[start..end].to_vec(),
        total,
        has_more: start > 0,
    }
}
