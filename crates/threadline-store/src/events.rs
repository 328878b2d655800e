use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use tracing::instrument;

use threadline_core::content::Content;
use threadline_core::events::{Author, Event};
use threadline_core::ids::EventId;
use threadline_core::session::SessionKey;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Per-session append lock so sequence numbers stay dense and ordered.
struct SessionLocks {
    locks: HashMap<SessionKey, Arc<Mutex<()>>>,
}

impl SessionLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, key: &SessionKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Append-only event log, one ordered sequence per session.
pub struct EventRepo {
    db: Database,
    session_locks: Mutex<SessionLocks>,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            session_locks: Mutex::new(SessionLocks::new()),
        }
    }

    /// Append an event at the end of the session's log and return its
    /// sequence number. Fails with NotFound if the session does not exist.
    #[instrument(skip(self, event), fields(session = %key, event_id = %event.id))]
    pub fn append(&self, key: &SessionKey, event: &Event) -> Result<i64, StoreError> {
        let lock = self.session_locks.lock().get(key);
        let _guard = lock.lock();

        let content = event.content.as_ref().map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            let max_seq: Option<i64> = conn
                .query_row(
                    "SELECT COALESCE((SELECT MAX(sequence) FROM events
                                      WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3), -1)
                     FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                    rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(max_seq) = max_seq else {
                return Err(StoreError::NotFound(format!("session {key}")));
            };
            let sequence = max_seq + 1;

            conn.execute(
                "INSERT INTO events (id, app_name, user_id, session_id, sequence, author, timestamp,
                                     partial, turn_complete, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    event.id.as_str(),
                    key.app_name,
                    key.user_id,
                    key.session_id.as_str(),
                    sequence,
                    event.author.as_str(),
                    row_helpers::format_time(event.timestamp),
                    event.partial,
                    event.turn_complete,
                    content,
                ],
            )?;

            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE app_name = ?2 AND user_id = ?3 AND id = ?4",
                rusqlite::params![row_helpers::now(), key.app_name, key.user_id, key.session_id.as_str()],
            )?;

            Ok(sequence)
        })
    }

    /// All events of a session in append order.
    #[instrument(skip(self), fields(session = %key))]
    pub fn list(&self, key: &SessionKey) -> Result<Vec<Event>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author, timestamp, partial, turn_complete, content
                 FROM events WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
                 ORDER BY sequence ASC",
            )?;
            let mut rows =
                stmt.query(rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
    }

    pub fn count(&self, key: &SessionKey) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
                rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<Event, StoreError> {
    let timestamp: String = row_helpers::get(row, 2, "events", "timestamp")?;
    let content: Option<String> = row_helpers::get_opt(row, 5, "events", "content")?;
    Ok(Event {
        id: EventId::from_raw(row_helpers::get::<String>(row, 0, "events", "id")?),
        author: Author::from(row_helpers::get::<String>(row, 1, "events", "author")?),
        timestamp: row_helpers::parse_time(&timestamp, "events", "timestamp")?,
        partial: row_helpers::get(row, 3, "events", "partial")?,
        turn_complete: row_helpers::get(row, 4, "events", "turn_complete")?,
        content: content
            .map(|raw| row_helpers::parse_json::<Content>(&raw, "events", "content"))
            .transpose()?,
    })
}
