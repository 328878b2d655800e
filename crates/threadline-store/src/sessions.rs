use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use threadline_core::ids::SessionId;
use threadline_core::session::SessionKey;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Free-form run-scoped bookkeeping attached to a session.
pub type SessionState = Map<String, Value>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub key: SessionKey,
    pub state: SessionState,
    pub created_at: String,
    pub updated_at: String,
}

/// Session directory: maps `(app, user, session)` to an event log.
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the session, creating an empty one if missing.
    /// An existing session is returned untouched.
    #[instrument(skip(self), fields(session = %key))]
    pub fn ensure(&self, key: &SessionKey) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (app_name, user_id, id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, '{}', ?4, ?4)",
                rusqlite::params![key.app_name, key.user_id, key.session_id.as_str(), now],
            )?;
            if inserted > 0 {
                debug!("session created");
            }
            fetch(conn, key)?.ok_or_else(|| StoreError::NotFound(format!("session {key}")))
        })
    }

    /// Create a session with the given state. Fails with Conflict if it exists.
    #[instrument(skip(self, state), fields(session = %key))]
    pub fn create(&self, key: &SessionKey, state: &SessionState) -> Result<SessionRow, StoreError> {
        let state_json = serde_json::to_string(state)?;
        self.db.with_conn(|conn| {
            let now = row_helpers::now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (app_name, user_id, id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![key.app_name, key.user_id, key.session_id.as_str(), state_json, now],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("session {key} already exists")));
            }
            Ok(SessionRow {
                key: key.clone(),
                state: state.clone(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(session = %key))]
    pub fn get(&self, key: &SessionKey) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            fetch(conn, key)?.ok_or_else(|| StoreError::NotFound(format!("session {key}")))
        })
    }

    pub fn exists(&self, key: &SessionKey) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| Ok(fetch(conn, key)?.is_some()))
    }

    /// Sessions owned by a user, most recently updated first.
    #[instrument(skip(self))]
    pub fn list(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT app_name, user_id, id, state, created_at, updated_at
                 FROM sessions WHERE app_name = ?1 AND user_id = ?2
                 ORDER BY updated_at DESC, id DESC",
            )?;
            let mut rows = stmt.query([app_name, user_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
    }

    /// Replace the state map.
    #[instrument(skip(self, state), fields(session = %key))]
    pub fn update_state(&self, key: &SessionKey, state: &SessionState) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(state)?;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET state = ?1, updated_at = ?2
                 WHERE app_name = ?3 AND user_id = ?4 AND id = ?5",
                rusqlite::params![
                    state_json,
                    row_helpers::now(),
                    key.app_name,
                    key.user_id,
                    key.session_id.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {key}")));
            }
            Ok(())
        })
    }

    /// Delete a session and its events. Version metadata is left alone.
    /// Returns whether a session was removed.
    #[instrument(skip(self), fields(session = %key))]
    pub fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()],
            )?;
            Ok(removed > 0)
        })
    }
}

fn fetch(conn: &rusqlite::Connection, key: &SessionKey) -> Result<Option<SessionRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT app_name, user_id, id, state, created_at, updated_at
         FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
    )?;
    let raw = stmt
        .query_row(
            rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()],
            |row| Ok(row_to_session(row)),
        )
        .optional()?;
    raw.transpose()
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let state_raw: String = row_helpers::get(row, 3, "sessions", "state")?;
    Ok(SessionRow {
        key: SessionKey {
            app_name: row_helpers::get(row, 0, "sessions", "app_name")?,
            user_id: row_helpers::get(row, 1, "sessions", "user_id")?,
            session_id: SessionId::from_raw(row_helpers::get::<String>(row, 2, "sessions", "id")?),
        },
        state: row_helpers::parse_json(&state_raw, "sessions", "state")?,
        created_at: row_helpers::get(row, 4, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 5, "sessions", "updated_at")?,
    })
}
