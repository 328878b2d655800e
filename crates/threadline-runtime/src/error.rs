use threadline_core::errors::EngineError;
use threadline_core::ids::SessionId;
use threadline_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Malformed or out-of-bounds request input. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// Validation failure on an edit submission.
    #[error("{0}")]
    InvalidEdit(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// The fork target exists but was not typed by the user.
    #[error("message is not editable: {0}")]
    MessageNotEditable(String),

    #[error("share not found: {0}")]
    ShareNotFound(String),

    #[error("share expired: {0}")]
    ShareExpired(String),

    /// The new session exists but replaying history into it failed.
    #[error("fork into {new_session_id} failed after {copied} events: {source}")]
    PartialFork {
        new_session_id: SessionId,
        copied: usize,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RuntimeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Short classification string for logging and API error codes.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::InvalidEdit(_) => "invalid_edit_payload",
            Self::SessionNotFound(_) => "session_not_found",
            Self::MessageNotFound(_) => "message_not_found",
            Self::MessageNotEditable(_) => "message_not_editable",
            Self::ShareNotFound(_) => "share_not_found",
            Self::ShareExpired(_) => "share_expired",
            Self::PartialFork { .. } => "partial_fork",
            Self::Store(_) => "storage",
            Self::Engine(_) => "engine",
        }
    }
}
