use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::SessionId;

/// Addresses one event log: `(app_name, user_id, session_id)`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: SessionId,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: SessionId,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id,
        }
    }

    /// Same app and user, different session.
    pub fn with_session(&self, session_id: SessionId) -> Self {
        Self {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}
