use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use threadline_runtime::ConversationService;

use crate::handlers;

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Applies until response headers are sent; streaming bodies are not cut.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 60,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConversationService>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/{app}/chat", post(handlers::chat))
        .route(
            "/api/{app}/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/api/{app}/sessions/{session_id}",
            axum::routing::delete(handlers::delete_session),
        )
        .route(
            "/api/{app}/sessions/{session_id}/history",
            get(handlers::session_history),
        )
        .route(
            "/api/{app}/sessions/{session_id}/edit",
            post(handlers::edit_message),
        )
        .route(
            "/api/{app}/sessions/{session_id}/versions",
            get(handlers::session_versions),
        )
        .route(
            "/api/share",
            get(handlers::list_shares).post(handlers::create_share),
        )
        .route(
            "/api/share/{share_id}",
            get(handlers::get_share).delete(handlers::delete_share),
        )
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Returns a handle with the bound port.
pub async fn start(
    config: ServerConfig,
    service: Arc<ConversationService>,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(
        AppState { service },
        Duration::from_secs(config.request_timeout_secs),
    );
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "threadline server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
    })
}

/// Handle returned by `start()`; aborting it stops the listener.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn abort(&self) {
        self.server.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use threadline_core::ids::SessionId;
    use threadline_core::session::SessionKey;
    use threadline_runtime::echo::HeuristicTitleGenerator;
    use threadline_runtime::mock::{ScriptedEngine, ScriptedRun};
    use threadline_runtime::ServiceConfig;
    use threadline_store::{Database, EventRepo, SessionRepo};

    struct TestServer {
        base: String,
        events: Arc<EventRepo>,
        db: Database,
        client: reqwest::Client,
        _handle: ServerHandle,
    }

    async fn serve(runs: Vec<ScriptedRun>) -> TestServer {
        let db = Database::in_memory().unwrap();
        let sessions = Arc::new(SessionRepo::new(db.clone()));
        let events = Arc::new(EventRepo::new(db.clone()));
        let engine = Arc::new(ScriptedEngine::new(runs).persist_to(events.clone()));
        let service = Arc::new(ConversationService::with_repos(
            sessions,
            events.clone(),
            db.clone(),
            engine,
            Arc::new(HeuristicTitleGenerator),
            ServiceConfig::default(),
        ));
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            ..Default::default()
        };
        let handle = start(config, service).await.unwrap();
        assert!(handle.port > 0);
        TestServer {
            base: format!("http://127.0.0.1:{}", handle.port),
            events,
            db,
            client: reqwest::Client::new(),
            _handle: handle,
        }
    }

    impl TestServer {
        async fn chat(&self, session_id: &str, message: &str) -> (u16, String) {
            let resp = self
                .client
                .post(format!("{}/api/assistant/chat", self.base))
                .json(&json!({"user_id": "u1", "session_id": session_id, "message": message}))
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.text().await.unwrap())
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .client
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> (u16, Value) {
            let resp = self.client.get(format!("{}{path}", self.base)).send().await.unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn delete(&self, path: &str) -> (u16, Value) {
            let resp = self.client.delete(format!("{}{path}", self.base)).send().await.unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        fn log(&self, session_id: &str) -> Vec<threadline_core::events::Event> {
            self.events
                .list(&SessionKey::new("assistant", "u1", SessionId::from_raw(session_id)))
                .unwrap()
        }
    }

    #[tokio::test]
    async fn serves_health() {
        let server = serve(vec![]).await;
        let (status, body) = server.get("/api/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn chat_streams_sse_frames() {
        let server = serve(vec![ScriptedRun::text_reply("assistant", &["Hel", "lo"])]).await;
        let (status, body) = server.chat("s1", "hi").await;
        assert_eq!(status, 200);

        assert!(body.contains("event: data"));
        assert!(body.contains(r#""content":"Hel""#));
        assert!(body.contains(r#""content":"lo""#));
        assert!(!body.contains(r#""content":"Hello""#));
        assert_eq!(body.matches("event: stop").count(), 1);
        assert!(body.contains(r#"{"status":"done"}"#));
        assert_eq!(server.log("s1").len(), 2);
    }

    #[tokio::test]
    async fn chat_validation_is_plain_json() {
        let server = serve(vec![]).await;
        let (status, body) = server
            .post(
                "/api/assistant/chat",
                json!({"user_id": "u1", "session_id": "s1", "message": "\n"}),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["code"], "invalid_request");
        assert_eq!(body["error"], "message or images required");
    }

    #[tokio::test]
    async fn sessions_history_and_edit() {
        let server = serve(vec![ScriptedRun::text_reply("assistant", &["answer"])]).await;
        server.chat("s1", "question").await;

        let (status, listed) = server.get("/api/assistant/sessions?user_id=u1").await;
        assert_eq!(status, 200);
        assert_eq!(listed[0]["session_id"], "s1");
        assert_eq!(listed[0]["message_count"], 2);

        let (status, page) = server
            .get("/api/assistant/sessions/s1/history?user_id=u1&limit=abc")
            .await;
        assert_eq!(status, 200);
        assert_eq!(page["limit"], 50);
        assert_eq!(page["total"], 2);
        assert_eq!(page["messages"][0]["role"], "user");
        assert_eq!(page["messages"][1]["role"], "assistant");

        let log = server.log("s1");
        let edit = |message_id: String| {
            json!({"user_id": "u1", "message_id": message_id, "new_content": "better question"})
        };

        let (status, body) = server
            .post("/api/assistant/sessions/s1/edit", edit(log[0].id.to_string()))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["version"], 2);
        assert_eq!(body["thread_id"], "s1");
        assert_eq!(body["edited_from_message_id"], log[0].id.to_string());

        let (status, body) = server
            .post("/api/assistant/sessions/s1/edit", edit(log[1].id.to_string()))
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["code"], "message_not_editable");

        let (status, body) = server
            .post("/api/assistant/sessions/s1/edit", edit("evt_missing".into()))
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "message_not_found");

        let (status, versions) = server.get("/api/assistant/sessions/s1/versions?user_id=u1").await;
        assert_eq!(status, 200);
        assert_eq!(versions["versions"].as_array().unwrap().len(), 2);

        let (status, _) = server.delete("/api/assistant/sessions/s1?user_id=u1").await;
        assert_eq!(status, 200);
        let (status, body) = server.get("/api/assistant/sessions/s1/history?user_id=u1").await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "session_not_found");
    }

    #[tokio::test]
    async fn failed_fork_replay_is_server_error() {
        let server = serve(vec![
            ScriptedRun::text_reply("assistant", &["one"]),
            ScriptedRun::text_reply("assistant", &["two"]),
        ])
        .await;
        server.chat("s1", "first").await;
        server.chat("s1", "second").await;
        let log = server.log("s1");
        assert_eq!(log.len(), 4);
        server
            .db
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_replay BEFORE INSERT ON events
                     WHEN NEW.session_id != 's1'
                      AND (SELECT COUNT(*) FROM events WHERE session_id = NEW.session_id) >= 1
                     BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let (status, body) = server
            .post(
                "/api/assistant/sessions/s1/edit",
                json!({"user_id": "u1", "message_id": log[2].id.to_string(), "new_content": "again"}),
            )
            .await;
        assert_eq!(status, 500);
        assert_eq!(body["code"], "partial_fork");
        assert_eq!(server.log("s1").len(), 4);
    }

    #[tokio::test]
    async fn share_flow() {
        let server = serve(vec![ScriptedRun::text_reply("assistant", &["shared"])]).await;
        server.chat("s1", "hello").await;

        let (status, created) = server
            .post(
                "/api/share",
                json!({"user_id": "u1", "session_id": "s1", "agent_id": "assistant", "expiry_days": 3}),
            )
            .await;
        assert_eq!(status, 200);
        let share_id = created["share_id"].as_str().unwrap().to_string();
        assert_eq!(created["share_url"], format!("/share/{share_id}"));

        let (status, shared) = server.get(&format!("/api/share/{share_id}")).await;
        assert_eq!(status, 200);
        assert_eq!(shared["is_expired"], false);
        assert_eq!(shared["messages"].as_array().unwrap().len(), 2);

        let (_, listed) = server.get("/api/share?user_id=u1").await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _) = server.delete(&format!("/api/share/{share_id}?user_id=u2")).await;
        assert_eq!(status, 404);
        let (status, body) = server.delete(&format!("/api/share/{share_id}?user_id=u1")).await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "share link deleted successfully");

        let (status, body) = server.get(&format!("/api/share/{share_id}")).await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "share_not_found");
    }
}
