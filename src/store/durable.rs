use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;
use crate::wal::{Wal, WalWriter};

use super::{BookingStore, RoomLock, RoomLocks, StoreError};

pub type SharedRoomCalendar = Arc<RwLock<RoomCalendar>>;

/// Apply a restriction-level event to one room's calendar. Caller holds the
/// calendar's write lock.
fn apply_to_calendar(
    cal: &mut RoomCalendar,
    event: &Event,
    restriction_rooms: &DashMap<RestrictionId, RoomId>,
) {
    match event {
        Event::RestrictionAdded { restriction } => {
            restriction_rooms.insert(restriction.id, restriction.room_id);
            cal.insert(restriction.clone());
        }
        Event::RestrictionRemoved { id, .. } => {
            cal.remove(*id);
            restriction_rooms.remove(id);
        }
        Event::ReservationRemoved { id } => {
            cal.restrictions.retain(|r| {
                let linked = r.reservation_id == Some(*id);
                if linked {
                    restriction_rooms.remove(&r.id);
                }
                !linked
            });
        }
        Event::RoomAdded { .. }
        | Event::ReservationAdded { .. }
        | Event::GuestUpdated { .. }
        | Event::ProcessedSet { .. }
        | Event::IdsReserved { .. } => {}
    }
}

/// Apply a row-level event to the room and reservation tables.
fn apply_to_tables(
    rooms: &DashMap<RoomId, Room>,
    reservations: &DashMap<ReservationId, Reservation>,
    event: &Event,
) {
    match event {
        Event::RoomAdded { room } => {
            rooms.insert(room.id, room.clone());
        }
        Event::ReservationAdded { reservation } => {
            reservations.insert(reservation.id, reservation.clone());
        }
        Event::GuestUpdated { id, guest, at } => {
            if let Some(mut r) = reservations.get_mut(id) {
                r.first_name = guest.first_name.clone();
                r.last_name = guest.last_name.clone();
                r.email = guest.email.clone();
                r.phone = guest.phone.clone();
                r.updated_at = *at;
            }
        }
        Event::ProcessedSet { id, processed, at } => {
            if let Some(mut r) = reservations.get_mut(id) {
                r.processed = *processed;
                r.updated_at = *at;
            }
        }
        Event::ReservationRemoved { id } => {
            reservations.remove(id);
        }
        Event::RestrictionAdded { .. } | Event::RestrictionRemoved { .. } | Event::IdsReserved { .. } => {}
    }
}

/// Next-id counters. Each allocation is strictly greater than every id seen.
#[derive(Default)]
struct Sequences {
    room: AtomicU64,
    reservation: AtomicU64,
    restriction: AtomicU64,
}

impl Sequences {
    fn observe(&self, event: &Event) {
        let bump = |seq: &AtomicU64, id: u64| {
            seq.fetch_max(id, Ordering::Relaxed);
        };
        match event {
            Event::RoomAdded { room } => bump(&self.room, room.id),
            Event::ReservationAdded { reservation } => bump(&self.reservation, reservation.id),
            Event::GuestUpdated { id, .. } | Event::ProcessedSet { id, .. } | Event::ReservationRemoved { id } => {
                bump(&self.reservation, *id)
            }
            Event::RestrictionAdded { restriction } => bump(&self.restriction, restriction.id),
            Event::RestrictionRemoved { id, .. } => bump(&self.restriction, *id),
            Event::IdsReserved {
                room,
                reservation,
                restriction,
            } => {
                bump(&self.room, *room);
                bump(&self.reservation, *reservation);
                bump(&self.restriction, *restriction);
            }
        }
    }

    fn next(seq: &AtomicU64) -> u64 {
        seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> Event {
        Event::IdsReserved {
            room: self.room.load(Ordering::Relaxed),
            reservation: self.reservation.load(Ordering::Relaxed),
            restriction: self.restriction.load(Ordering::Relaxed),
        }
    }
}

/// Persistent store: in-memory indexes rebuilt from a write-ahead log on open.
///
/// Every mutation is appended to the WAL (group-committed by a background
/// writer) before it is applied. Restrictions live in per-room calendars
/// sorted by start date, each behind its own `RwLock`, so the overlap check
/// and the insert happen under one write guard.
pub struct DurableStore {
    rooms: DashMap<RoomId, Room>,
    reservations: DashMap<ReservationId, Reservation>,
    calendars: DashMap<RoomId, SharedRoomCalendar>,
    /// Reverse lookup: restriction id → room id.
    restriction_rooms: DashMap<RestrictionId, RoomId>,
    seq: Sequences,
    wal: WalWriter,
    /// Mutations hold it shared; compaction holds it exclusively so no
    /// append lands between the snapshot and the file swap.
    writes: RwLock<()>,
    locks: RoomLocks,
}

impl DurableStore {
    /// Replay `wal_path` and start the WAL writer task. Must run inside a
    /// tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let wal = WalWriter::spawn(wal);

        let rooms: DashMap<RoomId, Room> = DashMap::new();
        let reservations: DashMap<ReservationId, Reservation> = DashMap::new();
        let restriction_rooms: DashMap<RestrictionId, RoomId> = DashMap::new();
        let seq = Sequences::default();
        let mut calendars: HashMap<RoomId, RoomCalendar> = HashMap::new();

        for event in &events {
            seq.observe(event);
            match event {
                Event::RoomAdded { room } => {
                    calendars.entry(room.id).or_insert_with(|| RoomCalendar::new(room.id));
                }
                Event::RestrictionAdded { restriction } => {
                    if let Some(cal) = calendars.get_mut(&restriction.room_id) {
                        apply_to_calendar(cal, event, &restriction_rooms);
                    }
                }
                Event::RestrictionRemoved { room_id, .. } => {
                    if let Some(cal) = calendars.get_mut(room_id) {
                        apply_to_calendar(cal, event, &restriction_rooms);
                    }
                }
                Event::ReservationRemoved { id } => {
                    let room_id = reservations.get(id).map(|r| r.room_id);
                    if let Some(cal) = room_id.and_then(|rid| calendars.get_mut(&rid)) {
                        apply_to_calendar(cal, event, &restriction_rooms);
                    }
                }
                _ => {}
            }
            apply_to_tables(&rooms, &reservations, event);
        }

        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            rooms = rooms.len(),
            reservations = reservations.len(),
            restrictions = restriction_rooms.len(),
            "store replayed"
        );

        Ok(Self {
            rooms,
            reservations,
            calendars: calendars
                .into_iter()
                .map(|(id, cal)| (id, Arc::new(RwLock::new(cal))))
                .collect(),
            restriction_rooms,
            seq,
            wal,
            writes: RwLock::new(()),
            locks: RoomLocks::default(),
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        self.wal
            .append(event.clone())
            .await
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append then apply a row-level event.
    async fn persist_row(&self, event: Event) -> Result<(), StoreError> {
        let _w = self.writes.read().await;
        self.wal_append(&event).await?;
        apply_to_tables(&self.rooms, &self.reservations, &event);
        Ok(())
    }

    /// WAL-append then apply an event touching one room's calendar. Caller
    /// holds `writes` shared, then that calendar's write guard, in that order.
    async fn persist_calendar(&self, cal: &mut RoomCalendar, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        apply_to_calendar(cal, &event, &self.restriction_rooms);
        apply_to_tables(&self.rooms, &self.reservations, &event);
        Ok(())
    }

    fn calendar(&self, room_id: RoomId) -> Option<SharedRoomCalendar> {
        self.calendars.get(&room_id).map(|e| e.value().clone())
    }

    fn with_room(&self, mut reservation: Reservation) -> Reservation {
        reservation.room = self.rooms.get(&reservation.room_id).map(|r| r.value().clone());
        reservation
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _w = self.writes.write().await;

        let mut events = vec![self.seq.snapshot()];

        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        events.extend(rooms.into_iter().map(|room| Event::RoomAdded { room }));

        let mut reservations: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationAdded { reservation }),
        );

        let calendars: Vec<SharedRoomCalendar> = self.calendars.iter().map(|e| e.value().clone()).collect();
        for cal in calendars {
            let guard = cal.read().await;
            events.extend(guard.restrictions.iter().map(|r| Event::RestrictionAdded {
                restriction: r.clone(),
            }));
        }

        let count = events.len();
        self.wal
            .rewrite(events)
            .await
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    /// Zero once the writer has stopped.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await.unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for DurableStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(&id).map(|r| r.value().clone()))
    }

    async fn insert_room(&self, name: &str) -> Result<Room, StoreError> {
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name too long"));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }
        let now = Utc::now();
        let room = Room {
            id: Sequences::next(&self.seq.room),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.persist_row(Event::RoomAdded { room: room.clone() }).await?;
        self.calendars
            .entry(room.id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomCalendar::new(room.id))));
        Ok(room)
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<ReservationId, StoreError> {
        if !self.rooms.contains_key(&new.room_id) {
            return Err(StoreError::not_found("room", new.room_id));
        }
        let id = Sequences::next(&self.seq.reservation);
        let now = Utc::now();
        let GuestDetails {
            first_name,
            last_name,
            email,
            phone,
        } = new.guest;
        let reservation = Reservation {
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
        };
        self.persist_row(Event::ReservationAdded { reservation }).await?;
        Ok(id)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let found = self.reservations.get(&id).map(|r| r.value().clone());
        Ok(found.map(|r| self.with_room(r)))
    }

    async fn list_reservations(&self, filter: ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| filter == ReservationFilter::All || !e.value().processed)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| (r.start_date, r.id));
        Ok(out.into_iter().map(|r| self.with_room(r)).collect())
    }

    async fn update_guest(&self, id: ReservationId, guest: GuestDetails) -> Result<(), StoreError> {
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::not_found("reservation", id));
        }
        self.persist_row(Event::GuestUpdated {
            id,
            guest,
            at: Utc::now(),
        })
        .await
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StoreError> {
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::not_found("reservation", id));
        }
        self.persist_row(Event::ProcessedSet {
            id,
            processed,
            at: Utc::now(),
        })
        .await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let room_id = self
            .reservations
            .get(&id)
            .map(|r| r.room_id)
            .ok_or(StoreError::not_found("reservation", id))?;
        let cal = self
            .calendar(room_id)
            .ok_or(StoreError::not_found("room", room_id))?;
        let _w = self.writes.read().await;
        let mut guard = cal.write().await;
        self.persist_calendar(&mut guard, Event::ReservationRemoved { id }).await
    }

    async fn insert_restriction(&self, new: NewRestriction) -> Result<RestrictionId, StoreError> {
        if new.span.is_empty() {
            return Err(StoreError::EmptySpan(new.span));
        }
        let cal = self
            .calendar(new.room_id)
            .ok_or(StoreError::not_found("room", new.room_id))?;
        let _w = self.writes.read().await;
        let mut guard = cal.write().await;
        // Checked under the calendar guard so a concurrent reservation delete
        // cannot leave this restriction behind.
        if let Some(rid) = new.reservation_id
            && !self.reservations.contains_key(&rid)
        {
            return Err(StoreError::not_found("reservation", rid));
        }
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        if let Some(existing) = guard.first_overlap(&new.span) {
            return Err(StoreError::Overlap {
                room_id: new.room_id,
                span: new.span,
                existing: existing.id,
            });
        }

        let id = Sequences::next(&self.seq.restriction);
        let now = Utc::now();
        let restriction = RoomRestriction {
            id,
            room_id: new.room_id,
            start_date: new.span.start,
            end_date: new.span.end,
            reservation_id: new.reservation_id,
            kind: new.kind,
            created_at: now,
            updated_at: now,
        };
        self.persist_calendar(&mut guard, Event::RestrictionAdded { restriction })
            .await?;
        Ok(id)
    }

    async fn get_restriction(&self, id: RestrictionId) -> Result<Option<RoomRestriction>, StoreError> {
        let Some(room_id) = self.restriction_rooms.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(cal) = self.calendar(room_id) else {
            return Ok(None);
        };
        let guard = cal.read().await;
        Ok(guard.restrictions.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_restriction(&self, id: RestrictionId) -> Result<(), StoreError> {
        let room_id = self
            .restriction_rooms
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::not_found("restriction", id))?;
        let cal = self
            .calendar(room_id)
            .ok_or(StoreError::not_found("room", room_id))?;
        let _w = self.writes.read().await;
        let mut guard = cal.write().await;
        if !guard.restrictions.iter().any(|r| r.id == id) {
            return Err(StoreError::not_found("restriction", id));
        }
        self.persist_calendar(&mut guard, Event::RestrictionRemoved { id, room_id })
            .await
    }

    async fn room_restrictions_overlapping(
        &self,
        room_id: RoomId,
        span: DateSpan,
    ) -> Result<Vec<RoomRestriction>, StoreError> {
        let Some(cal) = self.calendar(room_id) else {
            return Ok(Vec::new());
        };
        let guard = cal.read().await;
        Ok(guard.overlapping(&span).cloned().collect())
    }

    async fn restrictions_overlapping(&self, span: DateSpan) -> Result<Vec<RoomRestriction>, StoreError> {
        let mut calendars: Vec<(RoomId, SharedRoomCalendar)> = self
            .calendars
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        calendars.sort_by_key(|(id, _)| *id);

        let mut out = Vec::new();
        for (_, cal) in calendars {
            let guard = cal.read().await;
            out.extend(guard.overlapping(&span).cloned());
        }
        Ok(out)
    }

    async fn lock_room(&self, room_id: RoomId) -> Result<RoomLock, StoreError> {
        Ok(self.locks.acquire(room_id).await)
    }
}
