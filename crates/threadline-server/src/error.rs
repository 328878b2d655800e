use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use threadline_runtime::RuntimeError;

/// HTTP view of a [`RuntimeError`]: status, stable code and a client message.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub RuntimeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RuntimeError::Validation(_) | RuntimeError::InvalidEdit(_) => StatusCode::BAD_REQUEST,
            RuntimeError::SessionNotFound(_)
            | RuntimeError::MessageNotFound(_)
            | RuntimeError::ShareNotFound(_) => StatusCode::NOT_FOUND,
            RuntimeError::MessageNotEditable(_) => StatusCode::CONFLICT,
            RuntimeError::ShareExpired(_) => StatusCode::GONE,
            RuntimeError::PartialFork { .. } | RuntimeError::Store(_) | RuntimeError::Engine(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            RuntimeError::Validation(msg) | RuntimeError::InvalidEdit(msg) => msg.clone(),
            RuntimeError::SessionNotFound(_) => "session not found or access denied".into(),
            RuntimeError::MessageNotFound(_) => "message not found".into(),
            RuntimeError::MessageNotEditable(_) => "only user messages can be edited".into(),
            RuntimeError::ShareNotFound(_) => "shared conversation not found or access denied".into(),
            RuntimeError::ShareExpired(_) => "shared link has expired".into(),
            RuntimeError::PartialFork { new_session_id, .. } => {
                format!("failed to copy conversation into {new_session_id}")
            }
            RuntimeError::Store(_) | RuntimeError::Engine(_) => "internal server error".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, kind = self.0.error_kind(), "request failed");
        }
        let mut body = json!({
            "error": self.message(),
            "code": self.0.error_kind(),
        });
        if let RuntimeError::ShareExpired(expires_at) = &self.0 {
            body["expires_at"] = json!(expires_at);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_store::StoreError;

    #[test]
    fn statuses() {
        let cases = [
            (RuntimeError::validation("bad"), StatusCode::BAD_REQUEST),
            (RuntimeError::InvalidEdit("bad".into()), StatusCode::BAD_REQUEST),
            (RuntimeError::MessageNotFound("m".into()), StatusCode::NOT_FOUND),
            (RuntimeError::MessageNotEditable("m".into()), StatusCode::CONFLICT),
            (RuntimeError::ShareExpired("t".into()), StatusCode::GONE),
            (StoreError::Database("locked".into()).into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn storage_detail_stays_internal() {
        let err = ApiError(StoreError::Database("/var/lib/threadline.db is locked".into()).into());
        assert_eq!(err.message(), "internal server error");
    }
}
