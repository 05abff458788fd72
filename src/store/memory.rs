use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::limits::*;
use crate::model::*;

use super::{BookingStore, RoomLock, RoomLocks, StoreError};

#[derive(Default)]
struct Tables {
    rooms: BTreeMap<RoomId, Room>,
    reservations: BTreeMap<ReservationId, Reservation>,
    restrictions: BTreeMap<RestrictionId, RoomRestriction>,
    next_room_id: RoomId,
    next_reservation_id: ReservationId,
    next_restriction_id: RestrictionId,
}

impl Tables {
    fn with_room(&self, mut reservation: Reservation) -> Reservation {
        reservation.room = self.rooms.get(&reservation.room_id).cloned();
        reservation
    }

    fn overlapping(&self, room_id: Option<RoomId>, span: &DateSpan) -> Vec<RoomRestriction> {
        self.restrictions
            .values()
            .filter(|r| room_id.is_none_or(|id| r.room_id == id))
            .filter(|r| r.span().overlaps(span))
            .cloned()
            .collect()
    }
}

/// Ephemeral store: plain ordered maps behind one async mutex, linear scans.
/// Used as the test double and for throwaway deployments.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    locks: RoomLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-seeded with rooms named `names`, ids starting at 1.
    pub async fn with_rooms(names: &[&str]) -> Result<Self, StoreError> {
        let store = Self::new();
        for name in names {
            store.insert_room(name).await?;
        }
        Ok(store)
    }

    pub async fn reservation_count(&self) -> usize {
        self.tables.lock().await.reservations.len()
    }

    pub async fn restriction_count(&self) -> usize {
        self.tables.lock().await.restrictions.len()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.tables.lock().await.rooms.values().cloned().collect())
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.tables.lock().await.rooms.get(&id).cloned())
    }

    async fn insert_room(&self, name: &str) -> Result<Room, StoreError> {
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name too long"));
        }
        let mut t = self.tables.lock().await;
        if t.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }
        t.next_room_id += 1;
        let now = Utc::now();
        let room = Room {
            id: t.next_room_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        t.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<ReservationId, StoreError> {
        let mut t = self.tables.lock().await;
        if !t.rooms.contains_key(&new.room_id) {
            return Err(StoreError::not_found("room", new.room_id));
        }
        t.next_reservation_id += 1;
        let id = t.next_reservation_id;
        let now = Utc::now();
        let GuestDetails {
            first_name,
            last_name,
            email,
            phone,
        } = new.guest;
        t.reservations.insert(
            id,
            Reservation {
                id,
                first_name,
                last_name,
                email,
                phone,
                start_date: new.span.start,
                end_date: new.span.end,
                room_id: new.room_id,
                processed: false,
                created_at: now,
                updated_at: now,
                room: None,
            },
        );
        Ok(id)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.reservations.get(&id).cloned().map(|r| t.with_room(r)))
    }

    async fn list_reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        let t = self.tables.lock().await;
        let mut out: Vec<Reservation> = t
            .reservations
            .values()
            .filter(|r| filter == ReservationFilter::All || !r.processed)
            .cloned()
            .map(|r| t.with_room(r))
            .collect();
        out.sort_by_key(|r| (r.start_date, r.id));
        Ok(out)
    }

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        let r = t
            .reservations
            .get_mut(&id)
            .ok_or(StoreError::not_found("reservation", id))?;
        r.first_name = guest.first_name;
        r.last_name = guest.last_name;
        r.email = guest.email;
        r.phone = guest.phone;
        r.updated_at = Utc::now();
        Ok(())
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        let r = t
            .reservations
            .get_mut(&id)
            .ok_or(StoreError::not_found("reservation", id))?;
        r.processed = processed;
        r.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        if t.reservations.remove(&id).is_none() {
            return Err(StoreError::not_found("reservation", id));
        }
        t.restrictions.retain(|_, r| r.reservation_id != Some(id));
        Ok(())
    }

    async fn insert_restriction(&self, new: NewRestriction) -> Result<RestrictionId, StoreError> {
        if new.span.is_empty() {
            return Err(StoreError::EmptySpan(new.span));
        }
        let mut t = self.tables.lock().await;
        if !t.rooms.contains_key(&new.room_id) {
            return Err(StoreError::not_found("room", new.room_id));
        }
        if let Some(rid) = new.reservation_id
            && !t.reservations.contains_key(&rid)
        {
            return Err(StoreError::not_found("reservation", rid));
        }
        let on_room = t.restrictions.values().filter(|r| r.room_id == new.room_id).count();
        if on_room >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        if let Some(existing) = t.overlapping(Some(new.room_id), &new.span).first() {
            return Err(StoreError::Overlap {
                room_id: new.room_id,
                span: new.span,
                existing: existing.id,
            });
        }
        t.next_restriction_id += 1;
        let id = t.next_restriction_id;
        let now = Utc::now();
        t.restrictions.insert(
            id,
            RoomRestriction {
                id,
                room_id: new.room_id,
                start_date: new.span.start,
                end_date: new.span.end,
                reservation_id: new.reservation_id,
                kind: new.kind,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_restriction(&self, id: RestrictionId) -> Result<Option<RoomRestriction>, StoreError> {
        Ok(self.tables.lock().await.restrictions.get(&id).cloned())
    }

    async fn delete_restriction(&self, id: RestrictionId) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .restrictions
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::not_found("restriction", id))
    }

    async fn room_restrictions_overlapping(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        Ok(self.tables.lock().await.overlapping(Some(room_id), &span))
    }

    async fn restrictions_overlapping(&self, span: DateSpan) -> Result<Vec<RoomRestriction>, StoreError> {
        Ok(self.tables.lock().await.overlapping(None, &span))
    }

    async fn lock_room(&self, room_id: RoomId) -> Result<RoomLock, StoreError> {
        Ok(self.locks.acquire(room_id).await)
    }
}
