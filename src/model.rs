use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RoomId = u64;
pub type ReservationId = u64;
pub type RestrictionId = u64;

/// Half-open date range `[start, end)`. Calendar dates only, no time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The single day `[date, date + 1)`; `None` on the last representable date.
    pub fn day(date: NaiveDate) -> Option<Self> {
        let end = date.checked_add_days(Days::new(1))?;
        Some(Self { start: date, end })
    }

    /// A span with `start >= end` covers no day at all.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }

    /// `s1 < e2 && s2 < e1`. Empty spans overlap nothing, so a stay ending on
    /// day D never collides with one starting on D.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start < other.end
            && other.start < self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Clamp `self` to `window`; `None` when they do not overlap.
    pub fn intersect(&self, window: &DateSpan) -> Option<DateSpan> {
        if !self.overlaps(window) {
            return None;
        }
        Some(DateSpan::new(
            self.start.max(window.start),
            self.end.min(window.end),
        ))
    }

    /// Every day in the span, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Why a room is unavailable. Codes match the `restriction_id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestrictionKind {
    Reservation,
    OwnerBlock,
}

impl RestrictionKind {
    pub fn code(self) -> u8 {
        match self {
            RestrictionKind::Reservation => 1,
            RestrictionKind::OwnerBlock => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RestrictionKind::Reservation),
            2 => Some(RestrictionKind::OwnerBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Guest contact fields, the part of a reservation an admin may edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub room_id: RoomId,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Display snapshot, filled on reads. Never persisted.
    #[serde(skip)]
    pub room: Option<Room>,
}

impl Reservation {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.start_date, self.end_date)
    }

    pub fn guest(&self) -> GuestDetails {
        GuestDetails {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

/// Insert payload for a reservation; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest: GuestDetails,
    pub room_id: RoomId,
    pub span: DateSpan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Set for `RestrictionKind::Reservation`, absent for owner blocks.
    pub reservation_id: Option<ReservationId>,
    pub kind: RestrictionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomRestriction {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewRestriction {
    pub room_id: RoomId,
    pub span: DateSpan,
    pub reservation_id: Option<ReservationId>,
    pub kind: RestrictionKind,
}

impl NewRestriction {
    pub fn for_reservation(room_id: RoomId, span: DateSpan, reservation_id: ReservationId) -> Self {
        Self {
            room_id,
            span,
            reservation_id: Some(reservation_id),
            kind: RestrictionKind::Reservation,
        }
    }

    pub fn owner_block(room_id: RoomId, date: NaiveDate) -> Option<Self> {
        Some(Self {
            room_id,
            span: DateSpan::day(date)?,
            reservation_id: None,
            kind: RestrictionKind::OwnerBlock,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservationFilter {
    #[default]
    All,
    /// Not yet processed by staff.
    New,
}

/// All restrictions of one room, sorted by `start_date`.
#[derive(Debug, Clone, Default)]
pub struct RoomCalendar {
    pub room_id: RoomId,
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomCalendar {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            restrictions: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start date.
    pub fn insert(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.start_date, |r| r.start_date)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Restrictions overlapping `query`. Binary search skips everything
    /// starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.start_date < query.end);
        let query = *query;
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.span().overlaps(&query))
    }

    pub fn first_overlap(&self, query: &DateSpan) -> Option<&RoomRestriction> {
        self.overlapping(query).next()
    }
}

/// WAL record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomAdded {
        room: Room,
    },
    ReservationAdded {
        reservation: Reservation,
    },
    GuestUpdated {
        id: ReservationId,
        guest: GuestDetails,
        at: DateTime<Utc>,
    },
    ProcessedSet {
        id: ReservationId,
        processed: bool,
        at: DateTime<Utc>,
    },
    ReservationRemoved {
        id: ReservationId,
    },
    RestrictionAdded {
        restriction: RoomRestriction,
    },
    RestrictionRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
    /// Highest ids handed out so far. Written at the head of a compacted log
    /// so deleted ids are never reused after restart.
    IdsReserved {
        room: RoomId,
        reservation: ReservationId,
        restriction: RestrictionId,
    },
}
