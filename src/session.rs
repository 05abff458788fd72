//! Server-side session state keyed by a ULID session id.
//!
//! Values are stored as JSON so any serde type can ride in a session. Each
//! access slides the expiry forward; the reaper sweeps sessions that sat idle
//! past the TTL.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use ulid::Ulid;

use crate::limits::MAX_SESSION_KEYS;
use crate::model::*;

pub type SessionId = Ulid;

/// The in-progress reservation between search and confirmation.
pub const DRAFT_KEY: &str = "reservation";
/// The committed reservation, shown once on the summary page.
pub const SUMMARY_KEY: &str = "reservation_summary";
pub const FLASH_KEY: &str = "flash";
pub const ERROR_KEY: &str = "error";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} does not exist or has expired")]
    Unknown(SessionId),

    #[error("session value for `{key}`: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session holds too many keys")]
    TooManyKeys,
}

/// Dates chosen on the search page, plus the room once one is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub room_id: Option<RoomId>,
}

impl Draft {
    pub fn new(span: DateSpan) -> Self {
        Self {
            start_date: span.start,
            end_date: span.end,
            room_id: None,
        }
    }

    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.start_date, self.end_date)
    }
}

/// What the summary page shows after a successful booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub reservation_id: ReservationId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub room_id: RoomId,
    pub room_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl From<&Reservation> for Summary {
    fn from(r: &Reservation) -> Self {
        Self {
            reservation_id: r.id,
            first_name: r.first_name.clone(),
            last_name: r.last_name.clone(),
            email: r.email.clone(),
            phone: r.phone.clone(),
            room_id: r.room_id,
            room_name: r.room.as_ref().map(|room| room.name.clone()).unwrap_or_default(),
            start_date: r.start_date,
            end_date: r.end_date,
        }
    }
}

struct Session {
    values: HashMap<String, serde_json::Value>,
    expires_at: Instant,
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn create(&self) -> SessionId {
        let id = Ulid::new();
        self.sessions.insert(
            id,
            Session {
                values: HashMap::new(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.report();
        id
    }

    pub fn exists(&self, id: SessionId) -> bool {
        self.with_session(id, |_| ()).is_ok()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run `f` on a live session, sliding its expiry. Expired sessions are
    /// dropped on sight.
    fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> R) -> Result<R, SessionError> {
        let now = Instant::now();
        {
            let Some(mut session) = self.sessions.get_mut(&id) else {
                return Err(SessionError::Unknown(id));
            };
            if session.expires_at > now {
                session.expires_at = now + self.ttl;
                return Ok(f(&mut *session));
            }
        }
        self.sessions.remove(&id);
        self.report();
        Err(SessionError::Unknown(id))
    }

    pub fn put<T: Serialize>(&self, id: SessionId, key: &str, value: &T) -> Result<(), SessionError> {
        let json = serde_json::to_value(value).map_err(|source| SessionError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.with_session(id, |s| {
            if s.values.len() >= MAX_SESSION_KEYS && !s.values.contains_key(key) {
                return Err(SessionError::TooManyKeys);
            }
            s.values.insert(key.to_string(), json);
            Ok(())
        })?
    }

    pub fn get<T: DeserializeOwned>(&self, id: SessionId, key: &str) -> Result<Option<T>, SessionError> {
        let raw = self.with_session(id, |s| s.values.get(key).cloned())?;
        decode(key, raw)
    }

    /// Read and remove in one step.
    pub fn pop<T: DeserializeOwned>(&self, id: SessionId, key: &str) -> Result<Option<T>, SessionError> {
        let raw = self.with_session(id, |s| s.values.remove(key))?;
        decode(key, raw)
    }

    pub fn remove(&self, id: SessionId, key: &str) -> Result<(), SessionError> {
        self.with_session(id, |s| {
            s.values.remove(key);
        })
    }

    pub fn destroy(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            self.report();
        }
    }

    /// Drop every session idle past the TTL. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        let swept = before.saturating_sub(self.sessions.len());
        if swept > 0 {
            self.report();
        }
        swept
    }

    fn report(&self) {
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    // ── Typed helpers ────────────────────────────────────

    pub fn draft(&self, id: SessionId) -> Result<Option<Draft>, SessionError> {
        self.get(id, DRAFT_KEY)
    }

    pub fn put_draft(&self, id: SessionId, draft: &Draft) -> Result<(), SessionError> {
        self.put(id, DRAFT_KEY, draft)
    }

    pub fn take_draft(&self, id: SessionId) -> Result<Option<Draft>, SessionError> {
        self.pop(id, DRAFT_KEY)
    }

    pub fn put_summary(&self, id: SessionId, summary: &Summary) -> Result<(), SessionError> {
        self.put(id, SUMMARY_KEY, summary)
    }

    pub fn pop_summary(&self, id: SessionId) -> Result<Option<Summary>, SessionError> {
        self.pop(id, SUMMARY_KEY)
    }

    pub fn flash(&self, id: SessionId, message: &str) -> Result<(), SessionError> {
        self.put(id, FLASH_KEY, &message)
    }

    pub fn pop_flash(&self, id: SessionId) -> Result<Option<String>, SessionError> {
        self.pop(id, FLASH_KEY)
    }

    pub fn put_error(&self, id: SessionId, message: &str) -> Result<(), SessionError> {
        self.put(id, ERROR_KEY, &message)
    }

    pub fn pop_error(&self, id: SessionId) -> Result<Option<String>, SessionError> {
        self.pop(id, ERROR_KEY)
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: Option<serde_json::Value>) -> Result<Option<T>, SessionError> {
    raw.map(serde_json::from_value)
        .transpose()
        .map_err(|source| SessionError::Codec {
            key: key.to_string(),
            source,
        })
}
