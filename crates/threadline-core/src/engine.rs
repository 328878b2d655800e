use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::content::Content;
use crate::errors::EngineError;
use crate::events::Event;
use crate::session::SessionKey;

pub type EngineStream = Pin<Box<dyn Stream<Item = Result<Event, EngineError>> + Send>>;

/// Options passed through to the engine for one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Ask the engine for incremental partial events.
    pub streaming: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { streaming: true }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub key: SessionKey,
    pub message: Content,
    pub options: RunOptions,
}

/// The agent-execution collaborator.
///
/// A run appends the user message and the response events to the session's
/// log itself; callers only observe the stream.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, request: RunRequest) -> Result<EngineStream, EngineError>;
}

/// Produces a short conversation title from the first user message.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, first_message: &str) -> Result<String, EngineError>;
}
