/// Failures reported by an agent engine or title model.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub const SESSION_MISSING_MESSAGE: &'static str =
        "Session does not exist or has been deleted, please recreate";

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Upstream(_) => "upstream",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Message safe to show a client. Upstream and internal detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::SessionNotFound(_) => Self::SESSION_MISSING_MESSAGE.to_string(),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Cancelled => "request cancelled".to_string(),
            Self::Upstream(_) | Self::Internal(_) => {
                "The assistant failed to respond, please try again".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_message_is_friendly() {
        let err = EngineError::SessionNotFound("assistant/u/s".into());
        assert_eq!(err.user_message(), EngineError::SESSION_MISSING_MESSAGE);
        assert_eq!(err.error_kind(), "session_not_found");
    }

    #[test]
    fn upstream_detail_is_hidden() {
        let err = EngineError::Upstream("HTTP 500 from https://internal:8443".into());
        assert!(!err.user_message().contains("internal:8443"));
        assert!(err.to_string().contains("internal:8443"));
    }
}
