use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use threadline_core::ids::{SessionId, ShareId};
use threadline_core::session::SessionKey;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A time-boxed read-only pointer to one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareRow {
    pub share_id: ShareId,
    /// Target session; `user_id` is also the share's owner.
    pub key: SessionKey,
    pub expires_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ShareRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

pub struct ShareRepo {
    db: Database,
}

impl ShareRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(session = %key))]
    pub fn create(&self, key: &SessionKey, expires_at: DateTime<Utc>) -> Result<ShareRow, StoreError> {
        let share = ShareRow {
            share_id: ShareId::new(),
            key: key.clone(),
            expires_at,
            accessed_at: None,
            created_at: Utc::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO shares (share_id, app_name, user_id, session_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    share.share_id.as_str(),
                    key.app_name,
                    key.user_id,
                    key.session_id.as_str(),
                    row_helpers::format_time(share.expires_at),
                    row_helpers::format_time(share.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(share)
    }

    #[instrument(skip(self), fields(share_id = %share_id))]
    pub fn get(&self, share_id: &ShareId) -> Result<ShareRow, StoreError> {
        self.db.with_conn(|conn| {
            fetch(conn, share_id)?.ok_or_else(|| StoreError::NotFound(format!("share {share_id}")))
        })
    }

    /// Record a read. Expired shares are touched too.
    pub fn touch(&self, share_id: &ShareId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE shares SET accessed_at = ?1 WHERE share_id = ?2",
                rusqlite::params![row_helpers::format_time(at), share_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Shares owned by a user, newest first, optionally for one session.
    #[instrument(skip(self))]
    pub fn list_by_owner(
        &self,
        user_id: &str,
        session_id: Option<&SessionId>,
    ) -> Result<Vec<ShareRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT share_id, app_name, user_id, session_id, expires_at, accessed_at, created_at
                 FROM shares
                 WHERE user_id = ?1 AND (?2 IS NULL OR session_id = ?2)
                 ORDER BY created_at DESC",
            )?;
            let mut rows = stmt.query(rusqlite::params![user_id, session_id.map(SessionId::as_str)])?;
            let mut shares = Vec::new();
            while let Some(row) = rows.next()? {
                shares.push(row_to_share(row)?);
            }
            Ok(shares)
        })
    }

    /// Delete a share if `owner` created it. Returns whether a row was removed.
    #[instrument(skip(self), fields(share_id = %share_id))]
    pub fn delete(&self, share_id: &ShareId, owner: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM shares WHERE share_id = ?1 AND user_id = ?2",
                rusqlite::params![share_id.as_str(), owner],
            )?;
            Ok(removed > 0)
        })
    }
}

fn fetch(conn: &Connection, share_id: &ShareId) -> Result<Option<ShareRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT share_id, app_name, user_id, session_id, expires_at, accessed_at, created_at
         FROM shares WHERE share_id = ?1",
    )?;
    stmt.query_row([share_id.as_str()], |row| Ok(row_to_share(row)))
        .optional()?
        .transpose()
}

fn row_to_share(row: &rusqlite::Row<'_>) -> Result<ShareRow, StoreError> {
    let expires_at: String = row_helpers::get(row, 4, "shares", "expires_at")?;
    let accessed_at: Option<String> = row_helpers::get_opt(row, 5, "shares", "accessed_at")?;
    let created_at: String = row_helpers::get(row, 6, "shares", "created_at")?;
    Ok(ShareRow {
        share_id: ShareId::from_raw(row_helpers::get::<String>(row, 0, "shares", "share_id")?),
        key: SessionKey {
            app_name: row_helpers::get(row, 1, "shares", "app_name")?,
            user_id: row_helpers::get(row, 2, "shares", "user_id")?,
            session_id: SessionId::from_raw(row_helpers::get::<String>(row, 3, "shares", "session_id")?),
        },
        expires_at: row_helpers::parse_time(&expires_at, "shares", "expires_at")?,
        accessed_at: accessed_at
            .map(|raw| row_helpers::parse_time(&raw, "shares", "accessed_at"))
            .transpose()?,
        created_at: row_helpers::parse_time(&created_at, "shares", "created_at")?,
    })
}
