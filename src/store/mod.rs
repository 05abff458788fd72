//! Data-store capability set consumed by the availability engine and the
//! booking workflow, with an in-memory backend and a WAL-backed one.

mod durable;
mod error;
mod memory;

pub use durable::DurableStore;
pub use error::StoreError;
pub use memory::MemoryStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::*;

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// All rooms ordered by id.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Seeding only; request handling never creates rooms.
    async fn insert_room(&self, name: &str) -> Result<Room, StoreError>;

    async fn insert_reservation(&self, new: NewReservation) -> Result<ReservationId, StoreError>;

    /// With the room snapshot attached.
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Ordered by start date, then id, with room snapshots attached.
    async fn list_reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError>;

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError>;

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError>;

    /// Removes the reservation and every restriction linked to it.
    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError>;

    /// Rejects an interval overlapping an existing restriction on the same
    /// room with `StoreError::Overlap`.
    async fn insert_restriction(&self, new: NewRestriction) -> Result<RestrictionId, StoreError>;

    async fn get_restriction(&self, id: RestrictionId) -> Result<Option<RoomRestriction>, StoreError>;

    async fn delete_restriction(&self, id: RestrictionId) -> Result<(), StoreError>;

    async fn room_restrictions_overlapping(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError>;

    async fn restrictions_overlapping(&self, span: DateSpan) -> Result<Vec<RoomRestriction>, StoreError>;

    /// Advisory lock serializing check-then-insert sequences on one room.
    /// Held until the returned guard is dropped.
    async fn lock_room(&self, room_id: RoomId) -> Result<RoomLock, StoreError>;
}

/// Exclusive hold on one room's booking critical section.
#[derive(Debug)]
pub struct RoomLock {
    room_id: RoomId,
    _guard: OwnedMutexGuard<()>,
}

impl RoomLock {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }
}

/// Lazily created per-room mutexes, shared by both backends.
#[derive(Default)]
pub(crate) struct RoomLocks {
    locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl RoomLocks {
    pub(crate) async fn acquire(&self, room_id: RoomId) -> RoomLock {
        let mutex = self.locks.entry(room_id).or_default().value().clone();
        RoomLock {
            room_id,
            _guard: mutex.lock_owned().await,
        }
    }
}

/// Run one store call under `limit`; expiry abandons it as `StoreError::Timeout`.
pub async fn bounded<T, F>(op: &'static str, limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
            Err(StoreError::Timeout { op })
        }
    }
}

#[cfg(test)]
mod tests;
