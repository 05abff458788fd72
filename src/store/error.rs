use thiserror::Error;

use crate::model::{DateSpan, RestrictionId, RoomId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: u64 },

    #[error("room {room_id}: {span} overlaps restriction {existing}")]
    Overlap {
        room_id: RoomId,
        span: DateSpan,
        existing: RestrictionId,
    },

    #[error("restriction span {0} covers no day")]
    EmptySpan(DateSpan),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("store call `{op}` timed out")]
    Timeout { op: &'static str },

    #[error("WAL error: {0}")]
    Wal(String),

    /// A store write running on its own task panicked or was cancelled.
    #[error("store task failed: {0}")]
    TaskFailed(String),
}

impl StoreError {
    pub fn not_found(what: &'static str, id: u64) -> Self {
        StoreError::NotFound { what, id }
    }
}
