use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use threadline_core::ids::{EventId, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Version metadata row for one session.
///
/// `thread_id` and `version` are nullable so rows written before a session
/// was ever forked (for example by a title write) can be backfilled later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub thread_id: Option<SessionId>,
    pub version: Option<i64>,
    pub parent_session_id: String,
    pub edited_from_message_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionMeta {
    pub fn position(&self) -> ThreadPosition {
        ThreadPosition {
            thread_id: self
                .thread_id
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.session_id.clone()),
            version: self.version.filter(|v| *v > 0).unwrap_or(1),
        }
    }

    fn needs_backfill(&self) -> bool {
        self.thread_id.as_ref().map_or(true, |t| t.is_empty()) || self.version.map_or(true, |v| v <= 0)
    }
}

/// Where a session sits in its thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPosition {
    pub thread_id: SessionId,
    pub version: i64,
}

impl ThreadPosition {
    /// Sessions without metadata are version 1 of their own thread.
    pub fn root(session_id: &SessionId) -> Self {
        Self {
            thread_id: session_id.clone(),
            version: 1,
        }
    }
}

/// Side table of thread identity, version numbers and cached titles.
pub struct ThreadRegistry {
    db: Database,
}

impl ThreadRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get(&self, session_id: &SessionId) -> Result<Option<SessionMeta>, StoreError> {
        self.db.with_conn(|conn| fetch(conn, session_id))
    }

    /// Thread and version, defaulting to version 1 of its own thread.
    pub fn resolve(&self, session_id: &SessionId) -> Result<ThreadPosition, StoreError> {
        Ok(self
            .get(session_id)?
            .map(|meta| meta.position())
            .unwrap_or_else(|| ThreadPosition::root(session_id)))
    }

    /// Register `new_session` as the next version after `parent`.
    ///
    /// A parent without a row gets one synthesized as version 1; a parent row
    /// missing thread or version is backfilled in place. The new version is
    /// always derived from the parent, never from a global counter.
    #[instrument(skip(self), fields(parent = %parent, new_session = %new_session))]
    pub fn record_fork(
        &self,
        parent: &SessionId,
        new_session: &SessionId,
        cut_message: &EventId,
    ) -> Result<ThreadPosition, StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::now();
            let (parent_position, title) = match fetch(conn, parent)? {
                None => {
                    let position = ThreadPosition::root(parent);
                    conn.execute(
                        "INSERT INTO session_meta (session_id, thread_id, version, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        rusqlite::params![parent.as_str(), position.thread_id.as_str(), position.version, now],
                    )?;
                    debug!("synthesized parent metadata");
                    (position, String::new())
                }
                Some(meta) => {
                    let position = meta.position();
                    if meta.needs_backfill() {
                        conn.execute(
                            "UPDATE session_meta SET thread_id = ?1, version = ?2, updated_at = ?3
                             WHERE session_id = ?4",
                            rusqlite::params![
                                position.thread_id.as_str(),
                                position.version,
                                now,
                                parent.as_str()
                            ],
                        )?;
                        debug!("backfilled parent metadata");
                    }
                    (position, meta.title)
                }
            };

            let next = ThreadPosition {
                thread_id: parent_position.thread_id,
                version: parent_position.version.max(1) + 1,
            };

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO session_meta
                    (session_id, thread_id, version, parent_session_id, edited_from_message_id, title,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    new_session.as_str(),
                    next.thread_id.as_str(),
                    next.version,
                    parent.as_str(),
                    cut_message.as_str(),
                    title,
                    now
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!(
                    "session {new_session} already has version metadata"
                )));
            }
            Ok(next)
        })
    }

    /// Cached title, if one has been written.
    pub fn title(&self, session_id: &SessionId) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(session_id)?
            .map(|meta| meta.title)
            .filter(|t| !t.is_empty()))
    }

    /// Upsert the title without touching thread or version.
    #[instrument(skip(self, title), fields(session_id = %session_id))]
    pub fn set_title(&self, session_id: &SessionId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_meta (session_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at",
                rusqlite::params![session_id.as_str(), title, row_helpers::now()],
            )?;
            Ok(())
        })
    }

    /// Metadata rows for a batch of sessions; sessions without a row are absent.
    pub fn get_many(
        &self,
        session_ids: &[SessionId],
    ) -> Result<HashMap<SessionId, SessionMeta>, StoreError> {
        self.db.with_conn(|conn| {
            let mut found = HashMap::with_capacity(session_ids.len());
            for id in session_ids {
                if let Some(meta) = fetch(conn, id)? {
                    found.insert(id.clone(), meta);
                }
            }
            Ok(found)
        })
    }

    /// Every recorded version of a thread, oldest first.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn list_thread(&self, thread_id: &SessionId) -> Result<Vec<SessionMeta>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, thread_id, version, parent_session_id, edited_from_message_id,
                        title, created_at, updated_at
                 FROM session_meta
                 WHERE thread_id = ?1 OR (session_id = ?1 AND (thread_id IS NULL OR thread_id = ''))
                 ORDER BY COALESCE(version, 1) ASC, created_at ASC",
            )?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            let mut metas = Vec::new();
            while let Some(row) = rows.next()? {
                metas.push(row_to_meta(row)?);
            }
            Ok(metas)
        })
    }

    pub fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM session_meta WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(removed > 0)
        })
    }
}

fn fetch(conn: &Connection, session_id: &SessionId) -> Result<Option<SessionMeta>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT session_id, thread_id, version, parent_session_id, edited_from_message_id,
                title, created_at, updated_at
         FROM session_meta WHERE session_id = ?1",
    )?;
    stmt.query_row([session_id.as_str()], |row| Ok(row_to_meta(row)))
        .optional()?
        .transpose()
}

fn row_to_meta(row: &rusqlite::Row<'_>) -> Result<SessionMeta, StoreError> {
    Ok(SessionMeta {
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "session_meta", "session_id")?),
        thread_id: row_helpers::get_opt::<String>(row, 1, "session_meta", "thread_id")?
            .map(SessionId::from_raw),
        version: row_helpers::get_opt(row, 2, "session_meta", "version")?,
        parent_session_id: row_helpers::get(row, 3, "session_meta", "parent_session_id")?,
        edited_from_message_id: row_helpers::get(row, 4, "session_meta", "edited_from_message_id")?,
        title: row_helpers::get(row, 5, "session_meta", "title")?,
        created_at: row_helpers::get(row, 6, "session_meta", "created_at")?,
        updated_at: row_helpers::get(row, 7, "session_meta", "updated_at")?,
    })
}
