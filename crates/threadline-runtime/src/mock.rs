//! Scripted engine for tests and local wiring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use threadline_core::engine::{AgentEngine, EngineStream, RunRequest};
use threadline_core::errors::EngineError;
use threadline_core::events::Event;
use threadline_core::session::SessionKey;
use threadline_store::{EventRepo, StoreError};

/// One step of a scripted run.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Emit(Event),
    /// Yield the error and end the stream.
    Fail(EngineError),
    Pause(Duration),
}

#[derive(Clone, Debug)]
pub enum ScriptedRun {
    Steps(Vec<ScriptStep>),
    /// `run` itself fails before any stream exists.
    Reject(EngineError),
}

impl ScriptedRun {
    /// Partial chunks followed by the aggregated final event.
    pub fn text_reply(agent: &str, chunks: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = chunks
            .iter()
            .map(|chunk| ScriptStep::Emit(Event::agent_text(agent, *chunk).with_partial(true)))
            .collect();
        steps.push(ScriptStep::Emit(
            Event::agent_text(agent, chunks.concat()).with_turn_complete(),
        ));
        Self::Steps(steps)
    }
}

/// Replays queued [`ScriptedRun`]s, one per call to `run`.
///
/// With [`ScriptedEngine::persist_to`] it also writes the user message and
/// every non-partial event to the log, like a real engine would.
pub struct ScriptedEngine {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<RunRequest>>,
    call_count: AtomicUsize,
    events: Option<Arc<EventRepo>>,
}

impl ScriptedEngine {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            events: None,
        }
    }

    pub fn persist_to(mut self, events: Arc<EventRepo>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().clone()
    }
}

pub(crate) fn store_to_engine(key: &SessionKey, err: StoreError) -> EngineError {
    if err.is_not_found() {
        EngineError::SessionNotFound(key.to_string())
    } else {
        EngineError::Internal(err.to_string())
    }
}

struct Playback {
    steps: VecDeque<ScriptStep>,
    events: Option<Arc<EventRepo>>,
    key: SessionKey,
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: RunRequest) -> Result<EngineStream, EngineError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let run = self
            .runs
            .lock()
            .pop_front()
            .unwrap_or(ScriptedRun::Steps(Vec::new()));
        let steps = match run {
            ScriptedRun::Reject(err) => return Err(err),
            ScriptedRun::Steps(steps) => steps,
        };

        if let Some(events) = &self.events {
            events
                .append(&request.key, &Event::user_message(request.message.clone()))
                .map_err(|e| store_to_engine(&request.key, e))?;
        }

        let playback = Playback {
            steps: steps.into(),
            events: self.events.clone(),
            key: request.key,
        };
        let stream = futures::stream::unfold(playback, |mut state| async move {
            loop {
                match state.steps.pop_front()? {
                    ScriptStep::Pause(d) => tokio::time::sleep(d).await,
                    ScriptStep::Fail(err) => {
                        state.steps.clear();
                        return Some((Err(err), state));
                    }
                    ScriptStep::Emit(event) => {
                        if let (Some(events), false) = (&state.events, event.partial) {
                            if let Err(e) = events.append(&state.key, &event) {
                                let err = store_to_engine(&state.key, e);
                                state.steps.clear();
                                return Some((Err(err), state));
                            }
                        }
                        return Some((Ok(event), state));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
