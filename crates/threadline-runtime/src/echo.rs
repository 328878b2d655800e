//! Offline engine and title generator used when no model backend is wired.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use threadline_core::content::{Content, Part};
use threadline_core::engine::{AgentEngine, EngineStream, RunRequest, TitleGenerator};
use threadline_core::errors::EngineError;
use threadline_core::events::Event;
use threadline_store::EventRepo;

use crate::input::extract_file_names;
use crate::mock::store_to_engine;

const TITLE_MAX_CHARS: usize = 40;

/// Streams the user's own words back, one word per partial event.
pub struct EchoEngine {
    agent_name: String,
    events: Arc<EventRepo>,
}

impl EchoEngine {
    pub fn new(agent_name: impl Into<String>, events: Arc<EventRepo>) -> Self {
        Self {
            agent_name: agent_name.into(),
            events,
        }
    }

    fn reply_for(message: &Content) -> String {
        let text = message.plain_text();
        let (file_names, body) = extract_file_names(&text);
        let attachments = message
            .parts
            .iter()
            .filter(|p| matches!(p, Part::InlineData { .. }))
            .count();
        let mut reply = if body.trim().is_empty() {
            "You sent no text.".to_string()
        } else {
            format!("You said: {}", body.trim())
        };
        match (attachments, file_names.is_empty()) {
            (0, _) => {}
            (n, true) => reply.push_str(&format!(" ({n} attachment(s))")),
            (_, false) => reply.push_str(&format!(" (attached: {})", file_names.join(", "))),
        }
        reply
    }
}

fn word_chunks(text: &str) -> VecDeque<String> {
    let mut chunks = VecDeque::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch == ' ' {
            chunks.push_back(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push_back(current);
    }
    chunks
}

struct EchoState {
    chunks: VecDeque<String>,
    reply: Option<String>,
    agent_name: String,
    events: Arc<EventRepo>,
    request: RunRequest,
}

#[async_trait]
impl AgentEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(&self, request: RunRequest) -> Result<EngineStream, EngineError> {
        self.events
            .append(&request.key, &Event::user_message(request.message.clone()))
            .map_err(|e| store_to_engine(&request.key, e))?;

        let reply = Self::reply_for(&request.message);
        debug!(session = %request.key, chars = reply.len(), "echo reply");
        let chunks = if request.options.streaming {
            word_chunks(&reply)
        } else {
            VecDeque::new()
        };
        let state = EchoState {
            chunks,
            reply: Some(reply),
            agent_name: self.agent_name.clone(),
            events: self.events.clone(),
            request,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if let Some(chunk) = state.chunks.pop_front() {
                let event = Event::agent_text(state.agent_name.as_str(), chunk).with_partial(true);
                return Some((Ok(event), state));
            }
            let reply = state.reply.take()?;
            let event = Event::agent_text(state.agent_name.as_str(), reply).with_turn_complete();
            let item = match state.events.append(&state.request.key, &event) {
                Ok(_) => Ok(event),
                Err(e) => Err(store_to_engine(&state.request.key, e)),
            };
            Some((item, state))
        });
        Ok(Box::pin(stream))
    }
}

/// Titles from the first line of the message, without a model call.
#[derive(Default)]
pub struct HeuristicTitleGenerator;

#[async_trait]
impl TitleGenerator for HeuristicTitleGenerator {
    async fn generate(&self, first_message: &str) -> Result<String, EngineError> {
        let line = first_message
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        let cleaned: String = line
            .chars()
            .filter(|c| !matches!(c, '*' | '_' | '#' | '`' | '"' | '\''))
            .collect();
        let cleaned = cleaned.trim();
        if cleaned.chars().count() <= TITLE_MAX_CHARS {
            return Ok(cleaned.to_string());
        }
        let cut: String = cleaned.chars().take(TITLE_MAX_CHARS).collect();
        Ok(format!("{}...", cut.trim_end()))
    }
}
