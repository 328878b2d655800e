//! Relays one engine run to a client as [`StreamFrame`]s.
//!
//! Frames go into a bounded channel owned by the transport. A closed channel
//! means the client went away; the relay notices at the next engine item.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use threadline_core::engine::{AgentEngine, RunRequest};
use threadline_core::events::{Author, Event};

use crate::frames::{DataFrame, StreamFrame};

pub type FrameSink = mpsc::Sender<StreamFrame>;

/// Author used for tool images when no agent has spoken yet.
pub const FALLBACK_AUTHOR: &str = "model";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Engine stream exhausted and the stop marker delivered.
    Completed,
    /// An error frame was sent.
    Failed,
    /// The client disconnected; relaying stopped early.
    Disconnected,
}

/// Periodic keep-alive frames for the lifetime of one stream.
///
/// Stopped explicitly with [`Heartbeat::stop`]; dropping an unstopped
/// heartbeat cancels it instead. Either way the token is cancelled once.
pub struct Heartbeat {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(sink: FrameSink, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            biased;
                            () = token.cancelled() => break,
                            sent = sink.send(StreamFrame::heartbeat_now()) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel and wait for the task, so no heartbeat can follow.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if self.task.take().is_some() {
            self.cancel.cancel();
        }
    }
}

pub struct StreamPresenter {
    heartbeat_interval: Duration,
}

impl StreamPresenter {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval }
    }

    /// Run `request` on `engine` and relay it into `sink`.
    ///
    /// Exactly one `stop` frame ends a clean run. Errors end with an `error`
    /// frame and no `stop`. A disconnected client gets nothing further.
    #[instrument(skip_all, fields(session = %request.key, engine = engine.name()))]
    pub async fn present(
        &self,
        engine: &dyn AgentEngine,
        request: RunRequest,
        sink: &FrameSink,
    ) -> PresentOutcome {
        let heartbeat = Heartbeat::start(sink.clone(), self.heartbeat_interval);
        let outcome = relay(engine, request, sink).await;
        heartbeat.stop().await;

        if outcome == PresentOutcome::Completed && sink.send(StreamFrame::Stop).await.is_err() {
            return PresentOutcome::Disconnected;
        }
        debug!(?outcome, "stream finished");
        outcome
    }
}

async fn relay(engine: &dyn AgentEngine, request: RunRequest, sink: &FrameSink) -> PresentOutcome {
    let mut stream = match engine.run(request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, kind = e.error_kind(), "engine run failed to start");
            let _ = sink.send(StreamFrame::error(e.user_message())).await;
            return PresentOutcome::Failed;
        }
    };

    let mut agent_author: Option<String> = None;
    while let Some(item) = stream.next().await {
        if sink.is_closed() {
            debug!("client disconnected");
            return PresentOutcome::Disconnected;
        }

        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "engine stream failed");
                let _ = sink.send(StreamFrame::error(e.user_message())).await;
                return PresentOutcome::Failed;
            }
        };

        if let Author::Agent(name) = &event.author {
            agent_author = Some(name.clone());
        }

        for frame in frames_for(&event, agent_author.as_deref()) {
            if sink.send(frame).await.is_err() {
                debug!("client disconnected mid-event");
                return PresentOutcome::Disconnected;
            }
        }
    }
    PresentOutcome::Completed
}

/// Frames surfaced for one engine event.
///
/// Only partial text reaches the client; the engine always streams the
/// full text in partial chunks before the aggregated copy. Tool images are
/// credited to the agent that called the tool, since function responses
/// arrive under the user role.
pub fn frames_for(event: &Event, agent_author: Option<&str>) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    for part in event.parts() {
        if event.partial {
            if let Some((text, is_thought)) = part.as_text().filter(|(t, _)| !t.is_empty()) {
                frames.push(StreamFrame::Data(DataFrame::text(
                    event.author.as_str(),
                    text,
                    is_thought,
                )));
            }
        }
        if part.is_function_response() {
            let images = part.delivered_images();
            if !images.is_empty() {
                let author = agent_author.unwrap_or(FALLBACK_AUTHOR);
                frames.push(StreamFrame::Data(DataFrame::images(author, images)));
            }
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptStep, ScriptedEngine, ScriptedRun};
    use serde_json::json;
    use std::sync::Arc;
    use threadline_core::content::{Content, Part, Role};
    use threadline_core::errors::EngineError;
    use threadline_core::ids::SessionId;
    use threadline_core::session::SessionKey;

    fn request() -> RunRequest {
        RunRequest {
            key: SessionKey::new("assistant", "u1", SessionId::from_raw("s1")),
            message: Content::user_text("hi"),
            options: Default::default(),
        }
    }

    fn image_response(success: bool) -> Event {
        Event::new(
            Author::User,
            Some(Content::new(
                Role::User,
                vec![Part::FunctionResponse {
                    name: "imagegen".into(),
                    response: json!({"success": success, "images": ["data:image/png;base64,AA=="]})
                        .as_object()
                        .cloned()
                        .unwrap(),
                }],
            )),
        )
    }

    async fn run_to_end(engine: ScriptedEngine, heartbeat: Duration) -> (PresentOutcome, Vec<StreamFrame>) {
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::channel(64);
        let presenter = StreamPresenter::new(heartbeat);
        let task = tokio::spawn(async move { presenter.present(engine.as_ref(), request(), &tx).await });
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        (task.await.unwrap(), frames)
    }

    fn names(frames: &[StreamFrame]) -> Vec<&'static str> {
        frames.iter().map(StreamFrame::event_name).collect()
    }

    #[test]
    fn aggregated_text_is_suppressed() {
        let partial = Event::agent_text("assistant", "Hel").with_partial(true);
        let full = Event::agent_text("assistant", "Hello");
        assert_eq!(
            frames_for(&partial, Some("assistant")),
            vec![StreamFrame::Data(DataFrame::text("assistant", "Hel", false))]
        );
        assert!(frames_for(&full, Some("assistant")).is_empty());
    }

    #[test]
    fn partial_thoughts_are_flagged() {
        let event = Event::new(
            Author::agent("planner"),
            Some(Content::new(Role::Model, vec![Part::thought("hmm"), Part::text("")])),
        )
        .with_partial(true);
        assert_eq!(
            frames_for(&event, Some("planner")),
            vec![StreamFrame::Data(DataFrame::text("planner", "hmm", true))]
        );
    }

    #[test]
    fn tool_images_reattributed() {
        let frames = frames_for(&image_response(true), Some("painter"));
        assert_eq!(
            frames,
            vec![StreamFrame::Data(DataFrame::images(
                "painter",
                vec!["data:image/png;base64,AA==".into()]
            ))]
        );

        let fallback = frames_for(&image_response(true), None);
        let StreamFrame::Data(frame) = &fallback[0] else { panic!("expected data") };
        assert_eq!(frame.author, FALLBACK_AUTHOR);

        assert!(frames_for(&image_response(false), Some("painter")).is_empty());
    }

    #[tokio::test]
    async fn clean_run_ends_with_single_stop() {
        let engine = ScriptedEngine::new(vec![ScriptedRun::text_reply("assistant", &["Hel", "lo"])]);
        let (outcome, frames) = run_to_end(engine, Duration::from_secs(30)).await;
        assert_eq!(outcome, PresentOutcome::Completed);
        assert_eq!(names(&frames), vec!["data", "data", "stop"]);
        assert_eq!(frames[0], StreamFrame::Data(DataFrame::text("assistant", "Hel", false)));
    }

    #[tokio::test]
    async fn mid_stream_error_has_no_stop() {
        let engine = ScriptedEngine::new(vec![ScriptedRun::Steps(vec![
            ScriptStep::Emit(Event::agent_text("assistant", "par").with_partial(true)),
            ScriptStep::Fail(EngineError::SessionNotFound("s1".into())),
            ScriptStep::Emit(Event::agent_text("assistant", "never").with_partial(true)),
        ])]);
        let (outcome, frames) = run_to_end(engine, Duration::from_secs(30)).await;
        assert_eq!(outcome, PresentOutcome::Failed);
        assert_eq!(names(&frames), vec!["data", "error"]);
        assert_eq!(
            frames[1],
            StreamFrame::error(EngineError::SESSION_MISSING_MESSAGE)
        );
    }

    #[tokio::test]
    async fn rejected_run_reports_error() {
        let engine = ScriptedEngine::new(vec![ScriptedRun::Reject(EngineError::Upstream("503".into()))]);
        let (outcome, frames) = run_to_end(engine, Duration::from_secs(30)).await;
        assert_eq!(outcome, PresentOutcome::Failed);
        assert_eq!(names(&frames), vec!["error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_silent_run_alive() {
        let engine = ScriptedEngine::new(vec![ScriptedRun::Steps(vec![
            ScriptStep::Pause(Duration::from_secs(65)),
            ScriptStep::Emit(Event::agent_text("assistant", "done thinking").with_partial(true)),
        ])]);
        let (outcome, frames) = run_to_end(engine, Duration::from_secs(30)).await;
        assert_eq!(outcome, PresentOutcome::Completed);
        assert_eq!(names(&frames), vec!["heartbeat", "heartbeat", "data", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stops_with_stream() {
        let engine = Arc::new(ScriptedEngine::new(vec![ScriptedRun::text_reply("assistant", &["x"])]));
        let (tx, mut rx) = mpsc::channel(64);
        let presenter = StreamPresenter::new(Duration::from_secs(1));
        let outcome = presenter.present(engine.as_ref(), request(), &tx).await;
        assert_eq!(outcome, PresentOutcome::Completed);

        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(tx);
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(names(&frames), vec!["data", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_relay() {
        let engine = Arc::new(ScriptedEngine::new(vec![ScriptedRun::Steps(vec![
            ScriptStep::Emit(Event::agent_text("assistant", "one").with_partial(true)),
            ScriptStep::Pause(Duration::from_secs(1)),
            ScriptStep::Emit(Event::agent_text("assistant", "two").with_partial(true)),
            ScriptStep::Emit(Event::agent_text("assistant", "three").with_partial(true)),
        ])]));
        let (tx, mut rx) = mpsc::channel(64);
        let presenter = StreamPresenter::new(Duration::from_secs(30));
        let engine_ref = engine.clone();
        let weak = tx.downgrade();
        let task = tokio::spawn(async move { presenter.present(engine_ref.as_ref(), request(), &tx).await });

        let first = rx.recv().await.unwrap();
        assert_eq!(first, StreamFrame::Data(DataFrame::text("assistant", "one", false)));
        rx.close();

        assert_eq!(task.await.unwrap(), PresentOutcome::Disconnected);
        assert!(rx.recv().await.is_none());
        // The heartbeat task held the last sender clone.
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn no_heartbeat_after_error() {
        let engine = Arc::new(ScriptedEngine::new(vec![ScriptedRun::Steps(vec![
            ScriptStep::Pause(Duration::from_secs(35)),
            ScriptStep::Fail(EngineError::Upstream("reset".into())),
        ])]));
        let (tx, mut rx) = mpsc::channel(64);
        let presenter = StreamPresenter::new(Duration::from_secs(30));
        let outcome = presenter.present(engine.as_ref(), request(), &tx).await;
        assert_eq!(outcome, PresentOutcome::Failed);

        tokio::time::sleep(Duration::from_secs(120)).await;
        drop(tx);
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(names(&frames), vec!["heartbeat", "error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_heartbeat_is_cancelled() {
        let (tx, mut rx) = mpsc::channel(8);
        let heartbeat = Heartbeat::start(tx, Duration::from_secs(1));
        drop(heartbeat);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.recv().await.is_none());
    }
}
