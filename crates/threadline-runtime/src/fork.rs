//! Forking a session at a user message.
//!
//! A fork copies every event strictly before the cut point into a brand-new
//! session. The source log is only read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use threadline_core::events::Event;
use threadline_core::ids::{EventId, SessionId};
use threadline_core::session::SessionKey;
use threadline_store::{EventRepo, SessionRepo};

use crate::error::RuntimeError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForkOutcome {
    Forked { new_session_id: SessionId },
    /// The cut message id does not occur in the source log.
    NotFound,
    /// The cut message exists but was not typed by the user.
    NotEditable,
}

impl ForkOutcome {
    pub fn found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    pub fn editable(&self) -> bool {
        matches!(self, Self::Forked { .. })
    }

    pub fn new_session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Forked { new_session_id } => Some(new_session_id),
            _ => None,
        }
    }
}

/// Events to copy plus what the scan learned about the cut point.
#[derive(Clone, Debug)]
pub struct ForkPlan {
    pub copies: Vec<Event>,
    pub found: bool,
    pub editable: bool,
}

/// Scan `events` in order up to `cut`, copying everything before it.
///
/// Copies get fresh ids; zero timestamps are stamped with `now`. Cloning an
/// event clones its inline byte buffers, so copies never share storage with
/// the source.
pub fn collect_prefix(events: &[Event], cut: &EventId, now: DateTime<Utc>) -> ForkPlan {
    let mut copies = Vec::new();
    for event in events {
        if &event.id == cut {
            return ForkPlan {
                copies,
                found: true,
                editable: event.is_user_message(),
            };
        }
        let mut copy = event.clone();
        copy.id = EventId::new();
        if copy.has_zero_timestamp() {
            copy.timestamp = now;
        }
        copies.push(copy);
    }
    ForkPlan {
        copies,
        found: false,
        editable: false,
    }
}

pub struct ForkEngine {
    sessions: Arc<SessionRepo>,
    events: Arc<EventRepo>,
}

impl ForkEngine {
    pub fn new(sessions: Arc<SessionRepo>, events: Arc<EventRepo>) -> Self {
        Self { sessions, events }
    }

    /// Fork `source` at `cut`. Nothing is written unless the cut point is a
    /// user message.
    ///
    /// Creating the session and replaying events are separate writes. If a
    /// replay append fails the half-built session is left in place and
    /// reported as [`RuntimeError::PartialFork`].
    #[instrument(skip(self), fields(source = %source, cut = %cut))]
    pub fn fork(&self, source: &SessionKey, cut: &EventId) -> Result<ForkOutcome, RuntimeError> {
        let session = self.sessions.get(source).map_err(|e| {
            if e.is_not_found() {
                RuntimeError::SessionNotFound(source.to_string())
            } else {
                e.into()
            }
        })?;
        let events = self.events.list(source)?;

        let plan = collect_prefix(&events, cut, Utc::now());
        if !plan.found {
            return Ok(ForkOutcome::NotFound);
        }
        if !plan.editable {
            return Ok(ForkOutcome::NotEditable);
        }

        let new_key = source.with_session(SessionId::new());
        self.sessions.create(&new_key, &session.state)?;

        for (copied, event) in plan.copies.iter().enumerate() {
            if let Err(source_err) = self.events.append(&new_key, event) {
                warn!(
                    new_session = %new_key.session_id,
                    copied,
                    error = %source_err,
                    "fork replay failed, leaving partial session"
                );
                return Err(RuntimeError::PartialFork {
                    new_session_id: new_key.session_id,
                    copied,
                    source: source_err,
                });
            }
        }

        info!(new_session = %new_key.session_id, copied = plan.copies.len(), "session forked");
        Ok(ForkOutcome::Forked {
            new_session_id: new_key.session_id,
        })
    }
}
