use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use threadline_core::ids::{SessionId, ShareId};
use threadline_core::session::SessionKey;
use threadline_runtime::service::{
    ChatRequest, CreateShareRequest, CreatedSession, CreatedShare, EditRequest, EditResult,
    HistoryPage, SessionSummary, ShareSummary, SharedConversation, VersionList,
};

use crate::error::ApiError;
use crate::server::AppState;
use crate::sse::frame_stream;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: String,
}

/// Paging values arrive as strings; anything unparsable falls back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub user_id: String,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareListQuery {
    #[serde(default)]
    pub user_id: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub user_id: String,
}

fn session_key(app: String, user_id: String, session_id: String) -> SessionKey {
    SessionKey::new(app, user_id, SessionId::from_raw(session_id))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn chat(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state.service.start_chat(&app, request)?;
    Ok(frame_stream(rx))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Vec<SessionSummary>> {
    Ok(Json(state.service.list_sessions(&app, &query.user_id)?))
}

pub async fn create_session(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<CreatedSession> {
    Ok(Json(state.service.create_session(&app, &body.user_id)?))
}

pub async fn session_history(
    State(state): State<AppState>,
    Path((app, session_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryPage> {
    let parse = |v: Option<String>| v.and_then(|s| s.trim().parse::<i64>().ok());
    let page = state
        .service
        .page_query(parse(query.limit), parse(query.offset));
    let key = session_key(app, query.user_id, session_id);
    Ok(Json(state.service.history(&key, page)?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path((app, session_id)): Path<(String, String)>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Value> {
    let key = session_key(app, query.user_id, session_id);
    state.service.delete_session(&key)?;
    Ok(Json(json!({ "message": "session deleted successfully" })))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((app, session_id)): Path<(String, String)>,
    Json(request): Json<EditRequest>,
) -> ApiResult<EditResult> {
    let key = session_key(app, request.user_id.clone(), session_id);
    Ok(Json(state.service.edit(&key, request)?))
}

pub async fn session_versions(
    State(state): State<AppState>,
    Path((app, session_id)): Path<(String, String)>,
    Query(query): Query<UserQuery>,
) -> ApiResult<VersionList> {
    let key = session_key(app, query.user_id, session_id);
    Ok(Json(state.service.versions(&key)?))
}

pub async fn create_share(
    State(state): State<AppState>,
    Json(request): Json<CreateShareRequest>,
) -> ApiResult<CreatedShare> {
    Ok(Json(state.service.create_share(request)?))
}

pub async fn list_shares(
    State(state): State<AppState>,
    Query(query): Query<ShareListQuery>,
) -> ApiResult<Vec<ShareSummary>> {
    Ok(Json(
        state
            .service
            .list_shares(&query.user_id, query.session_id.as_deref())?,
    ))
}

pub async fn get_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> ApiResult<SharedConversation> {
    Ok(Json(state.service.get_share(&ShareId::from_raw(share_id))?))
}

pub async fn delete_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Value> {
    state
        .service
        .delete_share(&ShareId::from_raw(share_id), &query.user_id)?;
    Ok(Json(json!({ "message": "share link deleted successfully" })))
}
