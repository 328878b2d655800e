//! Conversation service: the operations behind the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use threadline_core::engine::{AgentEngine, RunOptions, RunRequest, TitleGenerator};
use threadline_core::events::Event;
use threadline_core::ids::{EventId, SessionId, ShareId};
use threadline_core::session::SessionKey;
use threadline_store::{
    Database, EventRepo, SessionRepo, SessionRow, ShareRepo, ShareRow, StoreError, ThreadRegistry,
};

use crate::error::RuntimeError;
use crate::fork::{ForkEngine, ForkOutcome};
use crate::frames::StreamFrame;
use crate::history::{build_messages, paginate, HistoryMessage, PageLimits, PageQuery};
use crate::input::{build_user_content, extract_file_names, title_seed, AttachmentLimits};
use crate::presenter::StreamPresenter;
use crate::title::spawn_title_task;

const FIRST_MESSAGE_PREVIEW_CHARS: usize = 50;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub heartbeat_interval: Duration,
    pub attachment_limits: AttachmentLimits,
    pub page_limits: PageLimits,
    pub share_default_days: i64,
    pub share_max_days: i64,
    /// Frames buffered between the presenter and a slow client.
    pub frame_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            attachment_limits: AttachmentLimits::default(),
            page_limits: PageLimits::default(),
            share_default_days: 7,
            share_max_days: 30,
            frame_buffer: 64,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub file_names: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EditRequest {
    pub user_id: String,
    pub message_id: String,
    #[serde(default)]
    pub new_content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub file_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EditResult {
    pub thread_id: SessionId,
    pub new_session_id: SessionId,
    pub version: i64,
    pub edited_from_message_id: EventId,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub app_name: String,
    pub user_id: String,
    pub last_update_time: String,
    pub message_count: usize,
    pub first_message: String,
    pub title: String,
    pub thread_id: SessionId,
    pub version: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryPage {
    pub session_id: SessionId,
    pub app_name: String,
    pub user_id: String,
    pub messages: Vec<HistoryMessage>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VersionInfo {
    pub session_id: SessionId,
    pub version: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent_session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub edited_from_message_id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct VersionList {
    pub thread_id: SessionId,
    pub versions: Vec<VersionInfo>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateShareRequest {
    pub user_id: String,
    pub session_id: String,
    #[serde(alias = "agent_id")]
    pub app_name: String,
    #[serde(default)]
    pub expiry_days: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreatedShare {
    pub share_id: ShareId,
    pub share_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SharedConversation {
    pub share_id: ShareId,
    pub session_id: SessionId,
    pub app_name: String,
    pub messages: Vec<HistoryMessage>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ShareSummary {
    pub share_id: ShareId,
    pub session_id: SessionId,
    pub app_name: String,
    pub share_url: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_expired: bool,
}

impl ShareSummary {
    fn from_row(row: ShareRow, now: DateTime<Utc>) -> Self {
        Self {
            is_expired: row.is_expired(now),
            share_url: share_url(&row.share_id),
            share_id: row.share_id,
            session_id: row.key.session_id,
            app_name: row.key.app_name,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

fn share_url(share_id: &ShareId) -> String {
    format!("/share/{share_id}")
}

fn require(value: &str, name: &str) -> Result<(), RuntimeError> {
    if value.trim().is_empty() {
        return Err(RuntimeError::validation(format!("{name} is required")));
    }
    Ok(())
}

fn session_lookup(key: &SessionKey) -> impl FnOnce(StoreError) -> RuntimeError + '_ {
    move |e| {
        if e.is_not_found() {
            RuntimeError::SessionNotFound(key.to_string())
        } else {
            e.into()
        }
    }
}

/// Owns the repositories and collaborators for one process.
pub struct ConversationService {
    sessions: Arc<SessionRepo>,
    events: Arc<EventRepo>,
    registry: Arc<ThreadRegistry>,
    shares: ShareRepo,
    forks: ForkEngine,
    presenter: StreamPresenter,
    engine: Arc<dyn AgentEngine>,
    titles: Arc<dyn TitleGenerator>,
    config: ServiceConfig,
}

impl ConversationService {
    pub fn new(
        db: Database,
        engine: Arc<dyn AgentEngine>,
        titles: Arc<dyn TitleGenerator>,
        config: ServiceConfig,
    ) -> Self {
        Self::with_repos(
            Arc::new(SessionRepo::new(db.clone())),
            Arc::new(EventRepo::new(db.clone())),
            db,
            engine,
            titles,
            config,
        )
    }

    /// Build around repositories the engine already shares.
    pub fn with_repos(
        sessions: Arc<SessionRepo>,
        events: Arc<EventRepo>,
        db: Database,
        engine: Arc<dyn AgentEngine>,
        titles: Arc<dyn TitleGenerator>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            forks: ForkEngine::new(sessions.clone(), events.clone()),
            registry: Arc::new(ThreadRegistry::new(db.clone())),
            shares: ShareRepo::new(db),
            presenter: StreamPresenter::new(config.heartbeat_interval),
            sessions,
            events,
            engine,
            titles,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    /// Validate, ensure the session, then stream the run on a background task.
    ///
    /// Validation and store errors are returned before any frame exists.
    /// Dropping the receiver disconnects the stream.
    #[instrument(skip(self, request), fields(app = app_name, session_id = %request.session_id))]
    pub fn start_chat(
        self: &Arc<Self>,
        app_name: &str,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamFrame>, RuntimeError> {
        require(&request.user_id, "user_id")?;
        require(&request.session_id, "session_id")?;
        let message = build_user_content(
            &request.message,
            &request.images,
            &request.file_names,
            &self.config.attachment_limits,
        )?;

        let key = SessionKey::new(
            app_name,
            request.user_id,
            SessionId::from_raw(request.session_id),
        );
        self.sessions.ensure(&key)?;

        spawn_title_task(
            self.registry.clone(),
            self.titles.clone(),
            key.session_id.clone(),
            title_seed(&request.message, request.images.len()),
        );

        let (tx, rx) = mpsc::channel(self.config.frame_buffer.max(1));
        let service = Arc::clone(self);
        let run = RunRequest {
            key,
            message,
            options: RunOptions::default(),
        };
        tokio::spawn(async move {
            service
                .presenter
                .present(service.engine.as_ref(), run, &tx)
                .await;
        });
        Ok(rx)
    }

    #[instrument(skip(self))]
    pub fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, RuntimeError> {
        require(user_id, "user_id")?;
        let rows = self.sessions.list(app_name, user_id)?;
        let ids: Vec<SessionId> = rows.iter().map(|r| r.key.session_id.clone()).collect();
        let metas = self.registry.get_many(&ids)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let events = self.events.list(&row.key)?;
            let meta = metas.get(&row.key.session_id);
            let position = meta.map_or_else(
                || threadline_store::ThreadPosition::root(&row.key.session_id),
                |m| m.position(),
            );
            summaries.push(SessionSummary {
                message_count: events.iter().filter(|e| e.content.is_some()).count(),
                first_message: first_message_preview(&events),
                title: meta.map(|m| m.title.clone()).unwrap_or_default(),
                thread_id: position.thread_id,
                version: position.version,
                last_update_time: row.updated_at,
                session_id: row.key.session_id,
                app_name: row.key.app_name,
                user_id: row.key.user_id,
            });
        }
        Ok(summaries)
    }

    pub fn create_session(&self, app_name: &str, user_id: &str) -> Result<CreatedSession, RuntimeError> {
        require(user_id, "user_id")?;
        let key = SessionKey::new(app_name, user_id, SessionId::new());
        let row: SessionRow = self.sessions.create(&key, &Default::default())?;
        info!(session = %key, "session created");
        Ok(CreatedSession {
            session_id: row.key.session_id,
            created_at: row.created_at,
        })
    }

    /// Remove the log and its events. Version metadata is kept.
    pub fn delete_session(&self, key: &SessionKey) -> Result<(), RuntimeError> {
        require(&key.user_id, "user_id")?;
        if !self.sessions.delete(key)? {
            return Err(RuntimeError::SessionNotFound(key.to_string()));
        }
        info!(session = %key, "session deleted");
        Ok(())
    }

    pub fn history(&self, key: &SessionKey, query: PageQuery) -> Result<HistoryPage, RuntimeError> {
        require(&key.user_id, "user_id")?;
        self.sessions.get(key).map_err(session_lookup(key))?;
        let messages = build_messages(&self.events.list(key)?);
        let page = paginate(&messages, query);
        Ok(HistoryPage {
            session_id: key.session_id.clone(),
            app_name: key.app_name.clone(),
            user_id: key.user_id.clone(),
            messages: page.items,
            total: page.total,
            limit: query.limit,
            offset: query.offset,
            has_more: page.has_more,
        })
    }

    pub fn page_query(&self, limit: Option<i64>, offset: Option<i64>) -> PageQuery {
        PageQuery::clamped(limit, offset, &self.config.page_limits)
    }

    /// Fork `key` at a user message and register the new version.
    ///
    /// The submitted replacement is validated but not written; the client
    /// sends it as the first chat turn of the new session.
    #[instrument(skip(self, request), fields(session = %key, message_id = %request.message_id))]
    pub fn edit(&self, key: &SessionKey, request: EditRequest) -> Result<EditResult, RuntimeError> {
        let invalid = |e: RuntimeError| match e {
            RuntimeError::Validation(msg) => RuntimeError::InvalidEdit(msg),
            other => other,
        };
        require(&key.user_id, "user_id").map_err(invalid)?;
        require(&request.message_id, "message_id").map_err(invalid)?;
        build_user_content(
            &request.new_content,
            &request.images,
            &request.file_names,
            &self.config.attachment_limits,
        )
        .map_err(invalid)?;

        let cut = EventId::from_raw(request.message_id);
        let new_session_id = match self.forks.fork(key, &cut)? {
            ForkOutcome::Forked { new_session_id } => new_session_id,
            ForkOutcome::NotFound => return Err(RuntimeError::MessageNotFound(cut.to_string())),
            ForkOutcome::NotEditable => {
                return Err(RuntimeError::MessageNotEditable(cut.to_string()))
            }
        };

        let position = self
            .registry
            .record_fork(&key.session_id, &new_session_id, &cut)
            .inspect_err(|e| {
                warn!(new_session = %new_session_id, error = %e, "fork registered without version");
            })?;
        Ok(EditResult {
            thread_id: position.thread_id,
            new_session_id,
            version: position.version,
            edited_from_message_id: cut,
        })
    }

    /// Every known version of the thread `key` belongs to, oldest first.
    pub fn versions(&self, key: &SessionKey) -> Result<VersionList, RuntimeError> {
        let session = self.sessions.get(key).map_err(session_lookup(key))?;
        let position = self.registry.resolve(&key.session_id)?;
        let mut versions: Vec<VersionInfo> = self
            .registry
            .list_thread(&position.thread_id)?
            .into_iter()
            .map(|meta| {
                let position = meta.position();
                VersionInfo {
                    session_id: meta.session_id,
                    version: position.version,
                    parent_session_id: meta.parent_session_id,
                    edited_from_message_id: meta.edited_from_message_id,
                    title: meta.title,
                    created_at: meta.created_at,
                }
            })
            .collect();
        if versions.is_empty() {
            versions.push(VersionInfo {
                session_id: key.session_id.clone(),
                version: 1,
                parent_session_id: String::new(),
                edited_from_message_id: String::new(),
                title: String::new(),
                created_at: session.created_at,
            });
        }
        Ok(VersionList {
            thread_id: position.thread_id,
            versions,
        })
    }

    /// Out-of-range expiry falls back to the default.
    fn share_days(&self, requested: i64) -> i64 {
        if requested <= 0 || requested > self.config.share_max_days {
            self.config.share_default_days
        } else {
            requested
        }
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    pub fn create_share(&self, request: CreateShareRequest) -> Result<CreatedShare, RuntimeError> {
        require(&request.user_id, "user_id")?;
        require(&request.session_id, "session_id")?;
        require(&request.app_name, "app_name")?;
        let key = SessionKey::new(
            request.app_name,
            request.user_id,
            SessionId::from_raw(request.session_id),
        );
        if !self.sessions.exists(&key)? {
            return Err(RuntimeError::SessionNotFound(key.to_string()));
        }

        let expires_at = Utc::now() + ChronoDuration::days(self.share_days(request.expiry_days));
        let share = self.shares.create(&key, expires_at)?;
        info!(share_id = %share.share_id, %expires_at, "share created");
        Ok(CreatedShare {
            share_url: share_url(&share.share_id),
            share_id: share.share_id,
            expires_at: share.expires_at,
        })
    }

    /// Read a shared conversation. Every read is recorded, expired or not.
    pub fn get_share(&self, share_id: &ShareId) -> Result<SharedConversation, RuntimeError> {
        let share = self.shares.get(share_id).map_err(|e| {
            if e.is_not_found() {
                RuntimeError::ShareNotFound(share_id.to_string())
            } else {
                e.into()
            }
        })?;
        let now = Utc::now();
        if let Err(e) = self.shares.touch(share_id, now) {
            warn!(share_id = %share_id, error = %e, "failed to record share access");
        }
        if share.is_expired(now) {
            return Err(RuntimeError::ShareExpired(share.expires_at.to_rfc3339()));
        }

        self.sessions.get(&share.key).map_err(session_lookup(&share.key))?;
        let messages = build_messages(&self.events.list(&share.key)?);
        Ok(SharedConversation {
            share_id: share.share_id,
            session_id: share.key.session_id,
            app_name: share.key.app_name,
            messages,
            expires_at: share.expires_at,
            is_expired: false,
        })
    }

    pub fn list_shares(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<ShareSummary>, RuntimeError> {
        require(user_id, "user_id")?;
        let session_id = session_id.filter(|s| !s.is_empty()).map(SessionId::from_raw);
        let now = Utc::now();
        Ok(self
            .shares
            .list_by_owner(user_id, session_id.as_ref())?
            .into_iter()
            .map(|row| ShareSummary::from_row(row, now))
            .collect())
    }

    pub fn delete_share(&self, share_id: &ShareId, user_id: &str) -> Result<(), RuntimeError> {
        require(user_id, "user_id")?;
        if !self.shares.delete(share_id, user_id)? {
            return Err(RuntimeError::ShareNotFound(share_id.to_string()));
        }
        info!(share_id = %share_id, "share deleted");
        Ok(())
    }
}

/// First non-empty text in the log, without the file-name marker.
fn first_message_preview(events: &[Event]) -> String {
    let Some(text) = events
        .iter()
        .flat_map(Event::parts)
        .filter_map(|p| p.as_text().filter(|(_, thought)| !thought).map(|(t, _)| t))
        .map(|t| extract_file_names(t).1)
        .find(|t| !t.is_empty())
    else {
        return String::new();
    };
    if text.chars().count() <= FIRST_MESSAGE_PREVIEW_CHARS {
        return text.to_string();
    }
    let preview: String = text.chars().take(FIRST_MESSAGE_PREVIEW_CHARS).collect();
    format!("{preview}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::HeuristicTitleGenerator;
    use crate::mock::{ScriptedEngine, ScriptedRun};
    use threadline_core::content::Content;
    use threadline_core::events::Author;

    const APP: &str = "assistant";

    struct Fixture {
        service: Arc<ConversationService>,
        engine: Arc<ScriptedEngine>,
        events: Arc<EventRepo>,
        db: Database,
    }

    fn fixture(runs: Vec<ScriptedRun>) -> Fixture {
        let db = Database::in_memory().unwrap();
        let sessions = Arc::new(SessionRepo::new(db.clone()));
        let events = Arc::new(EventRepo::new(db.clone()));
        let engine = Arc::new(ScriptedEngine::new(runs).persist_to(events.clone()));
        let service = Arc::new(ConversationService::with_repos(
            sessions,
            events.clone(),
            db.clone(),
            engine.clone(),
            Arc::new(HeuristicTitleGenerator),
            ServiceConfig::default(),
        ));
        Fixture {
            service,
            engine,
            events,
            db,
        }
    }

    fn chat(session_id: &str, message: &str) -> ChatRequest {
        ChatRequest {
            user_id: "u1".into(),
            session_id: session_id.into(),
            message: message.into(),
            images: Vec::new(),
            file_names: Vec::new(),
        }
    }

    fn key(session_id: &str) -> SessionKey {
        SessionKey::new(APP, "u1", SessionId::from_raw(session_id))
    }

    async fn drain(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn edit_request(message_id: &EventId) -> EditRequest {
        EditRequest {
            user_id: "u1".into(),
            message_id: message_id.to_string(),
            new_content: "revised".into(),
            images: Vec::new(),
            file_names: Vec::new(),
        }
    }

    #[tokio::test]
    async fn chat_streams_and_persists() {
        let f = fixture(vec![ScriptedRun::text_reply("assistant", &["Hi", " there"])]);
        let rx = f.service.start_chat(APP, chat("s1", "\r\nhello\n")).unwrap();
        let frames = drain(rx).await;

        let names: Vec<_> = frames.iter().map(StreamFrame::event_name).collect();
        assert_eq!(names, vec!["data", "data", "stop"]);

        let requests = f.engine.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, Content::user_text("hello"));

        let log = f.events.list(&key("s1")).unwrap();
        assert_eq!(log.len(), 2);

        for _ in 0..50 {
            if f.service.registry().title(&SessionId::from_raw("s1")).unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            f.service.registry().title(&SessionId::from_raw("s1")).unwrap().as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn invalid_chat_touches_nothing() {
        let f = fixture(vec![]);
        let err = f.service.start_chat(APP, chat("s1", "\n\r\n")).unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(ref m) if m == "message or images required"));

        let mut too_many = chat("s1", "x");
        too_many.images = vec!["data:image/png;base64,AA==".into(); 5];
        assert!(f.service.start_chat(APP, too_many).is_err());

        assert_eq!(f.engine.call_count(), 0);
        assert!(f.service.list_sessions(APP, "u1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_forks_new_versions() {
        let f = fixture(vec![
            ScriptedRun::text_reply("assistant", &["one"]),
            ScriptedRun::text_reply("assistant", &["two"]),
        ]);
        drain(f.service.start_chat(APP, chat("s1", "first")).unwrap()).await;
        drain(f.service.start_chat(APP, chat("s1", "second")).unwrap()).await;
        let log = f.events.list(&key("s1")).unwrap();
        assert_eq!(log.len(), 4);

        let v2 = f.service.edit(&key("s1"), edit_request(&log[2].id)).unwrap();
        assert_eq!(v2.thread_id, SessionId::from_raw("s1"));
        assert_eq!(v2.version, 2);
        assert_eq!(v2.edited_from_message_id, log[2].id);
        let forked = f.events.list(&key(v2.new_session_id.as_str())).unwrap();
        assert_eq!(forked.len(), 2);
        assert_eq!(f.events.list(&key("s1")).unwrap(), log);

        let v3 = f
            .service
            .edit(&key(v2.new_session_id.as_str()), edit_request(&forked[0].id))
            .unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.thread_id, SessionId::from_raw("s1"));
        assert!(f.events.list(&key(v3.new_session_id.as_str())).unwrap().is_empty());

        let versions = f.service.versions(&key(v3.new_session_id.as_str())).unwrap();
        let numbers: Vec<_> = versions.versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(versions.thread_id, SessionId::from_raw("s1"));
    }

    #[tokio::test]
    async fn partial_fork_is_not_versioned() {
        let f = fixture(vec![
            ScriptedRun::text_reply("assistant", &["one"]),
            ScriptedRun::text_reply("assistant", &["two"]),
        ]);
        drain(f.service.start_chat(APP, chat("s1", "first")).unwrap()).await;
        drain(f.service.start_chat(APP, chat("s1", "second")).unwrap()).await;
        let log = f.events.list(&key("s1")).unwrap();
        f.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER fail_replay BEFORE INSERT ON events
                 WHEN NEW.session_id != 's1'
                  AND (SELECT COUNT(*) FROM events WHERE session_id = NEW.session_id) >= 1
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let err = f.service.edit(&key("s1"), edit_request(&log[2].id)).unwrap_err();
        let RuntimeError::PartialFork { new_session_id, copied, .. } = &err else {
            panic!("expected partial fork, got {err:?}");
        };
        assert_eq!(*copied, 1);
        assert_eq!(f.events.count(&key(new_session_id.as_str())).unwrap(), 1);
        assert!(f.service.registry().get(new_session_id).unwrap().is_none());
        assert_eq!(f.service.list_sessions(APP, "u1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn edit_rejections() {
        let f = fixture(vec![ScriptedRun::text_reply("assistant", &["reply"])]);
        drain(f.service.start_chat(APP, chat("s1", "question")).unwrap()).await;
        let log = f.events.list(&key("s1")).unwrap();

        let missing = f.service.edit(&key("s1"), edit_request(&EventId::from_raw("nope")));
        assert!(matches!(missing, Err(RuntimeError::MessageNotFound(_))));

        let model = f.service.edit(&key("s1"), edit_request(&log[1].id));
        assert!(matches!(model, Err(RuntimeError::MessageNotEditable(_))));

        let mut empty = edit_request(&log[0].id);
        empty.new_content = "\n".into();
        let err = f.service.edit(&key("s1"), empty).unwrap_err();
        assert_eq!(err.error_kind(), "invalid_edit_payload");

        let gone = f.service.edit(&key("missing"), edit_request(&log[0].id));
        assert!(matches!(gone, Err(RuntimeError::SessionNotFound(_))));

        assert_eq!(f.service.list_sessions(APP, "u1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let f = fixture(vec![]);
        let k = key("s1");
        f.service.sessions.ensure(&k).unwrap();
        for i in 0..10 {
            f.events
                .append(&k, &Event::agent_text("assistant", format!("m{i}")))
                .unwrap();
        }

        let page = f.service.history(&k, f.service.page_query(Some(3), Some(0))).unwrap();
        let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
        assert!(page.has_more);
        assert_eq!(page.total, 10);

        let page = f.service.history(&k, f.service.page_query(Some(3), Some(9))).unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(!page.has_more);

        let page = f.service.history(&k, f.service.page_query(Some(500), None)).unwrap();
        assert_eq!(page.limit, 100);
        assert_eq!(page.messages.len(), 10);

        assert!(matches!(
            f.service.history(&key("other"), PageQuery { limit: 5, offset: 0 }),
            Err(RuntimeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn session_listing_and_delete() {
        let f = fixture(vec![]);
        let created = f.service.create_session(APP, "u1").unwrap();
        let k = key(created.session_id.as_str());
        let long = "x".repeat(60);
        f.events
            .append(&k, &Event::user_message(Content::user_text(long.clone())))
            .unwrap();
        f.events.append(&k, &Event::new(Author::agent("assistant"), None)).unwrap();

        let listed = f.service.list_sessions(APP, "u1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_count, 1);
        assert_eq!(listed[0].first_message, format!("{}...", &long[..50]));
        assert_eq!(listed[0].version, 1);
        assert_eq!(listed[0].thread_id, created.session_id);

        f.service.delete_session(&k).unwrap();
        assert!(matches!(f.service.delete_session(&k), Err(RuntimeError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn share_lifecycle() {
        let f = fixture(vec![ScriptedRun::text_reply("assistant", &["shared reply"])]);
        drain(f.service.start_chat(APP, chat("s1", "hello")).unwrap()).await;

        let request = CreateShareRequest {
            user_id: "u1".into(),
            session_id: "s1".into(),
            app_name: APP.into(),
            expiry_days: 90,
        };
        let created = f.service.create_share(request.clone()).unwrap();
        assert_eq!(created.share_url, format!("/share/{}", created.share_id));
        let days = (created.expires_at - Utc::now()).num_days();
        assert!((6..=7).contains(&days));

        let shared = f.service.get_share(&created.share_id).unwrap();
        assert_eq!(shared.messages.len(), 2);
        assert!(!shared.is_expired);

        let listed = f.service.list_shares("u1", Some("s1")).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(f.service.list_shares("u1", Some("other")).unwrap().is_empty());

        assert!(matches!(
            f.service.delete_share(&created.share_id, "intruder"),
            Err(RuntimeError::ShareNotFound(_))
        ));
        f.service.delete_share(&created.share_id, "u1").unwrap();
        assert!(matches!(
            f.service.get_share(&created.share_id),
            Err(RuntimeError::ShareNotFound(_))
        ));

        let mut missing = request;
        missing.session_id = "ghost".into();
        assert!(matches!(
            f.service.create_share(missing),
            Err(RuntimeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_share_is_gone() {
        let f = fixture(vec![]);
        let k = key("s1");
        f.service.sessions.ensure(&k).unwrap();
        let shares = ShareRepo::new(f.db.clone());
        let stale = shares.create(&k, Utc::now() - ChronoDuration::hours(1)).unwrap();

        let err = f.service.get_share(&stale.share_id).unwrap_err();
        assert!(matches!(err, RuntimeError::ShareExpired(_)));
        assert!(shares.get(&stale.share_id).unwrap().accessed_at.is_some());
    }

    #[test]
    fn share_days_fall_back() {
        let f = fixture(vec![]);
        assert_eq!(f.service.share_days(0), 7);
        assert_eq!(f.service.share_days(-3), 7);
        assert_eq!(f.service.share_days(31), 7);
        assert_eq!(f.service.share_days(30), 30);
        assert_eq!(f.service.share_days(1), 1);
    }
}
