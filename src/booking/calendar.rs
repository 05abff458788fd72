use std::collections::BTreeSet;

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::forms::FormErrors;
use crate::model::*;

use super::{BookingError, BookingService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayState {
    Free,
    Reserved {
        reservation_id: ReservationId,
        restriction_id: RestrictionId,
    },
    Blocked {
        restriction_id: RestrictionId,
    },
}

/// One room's month, one entry per day in date order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCalendar {
    pub room_id: RoomId,
    pub span: DateSpan,
    pub days: Vec<(NaiveDate, DayState)>,
}

impl MonthCalendar {
    pub fn state(&self, date: NaiveDate) -> Option<DayState> {
        let idx = (date - self.span.start).num_days();
        if idx < 0 {
            return None;
        }
        self.days.get(idx as usize).map(|(_, s)| *s)
    }
}

/// Restriction ids created and deleted by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockChanges {
    pub added: Vec<RestrictionId>,
    pub removed: Vec<RestrictionId>,
}

/// `[first of month, first of next month)`, or `None` for an invalid month.
pub fn month_span(year: i32, month: u32) -> Option<DateSpan> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    Some(DateSpan::new(first, next))
}

fn day_state(date: NaiveDate, restrictions: &[RoomRestriction]) -> DayState {
    match restrictions.iter().find(|r| r.span().contains(date)) {
        None => DayState::Free,
        Some(r) => match (r.kind, r.reservation_id) {
            (RestrictionKind::Reservation, Some(reservation_id)) => DayState::Reserved {
                reservation_id,
                restriction_id: r.id,
            },
            _ => DayState::Blocked { restriction_id: r.id },
        },
    }
}

impl BookingService {
    pub async fn month_calendar(&self, room_id: RoomId, year: i32, month: u32) -> Result<MonthCalendar, BookingError> {
        let Some(span) = month_span(year, month) else {
            let mut errors = FormErrors::default();
            errors.add("month", "Invalid month");
            return Err(BookingError::Validation { errors, request: None });
        };
        if self.call("get_room", self.store.get_room(room_id)).await?.is_none() {
            return Err(BookingError::NotFound { what: "room", id: room_id });
        }
        let restrictions = self
            .call(
                "room_restrictions_overlapping",
                self.store.room_restrictions_overlapping(room_id, span),
            )
            .await?;
        let days = span.days().map(|d| (d, day_state(d, &restrictions))).collect();
        Ok(MonthCalendar { room_id, span, days })
    }

    /// Make the month's owner blocks match the checked days in `keep`.
    ///
    /// A block with any visible day unchecked is removed once. Each checked
    /// free day gets one new block. Checked days outside the month or under a
    /// reservation are ignored. A day taken concurrently, or a block already
    /// gone, is skipped with a warning rather than failing the whole pass.
    pub async fn reconcile_blocks(
        &self,
        room_id: RoomId,
        year: i32,
        month: u32,
        keep: &BTreeSet<NaiveDate>,
    ) -> Result<BlockChanges, BookingError> {
        let calendar = self.month_calendar(room_id, year, month).await?;

        let deselected: BTreeSet<RestrictionId> = calendar
            .days
            .iter()
            .filter_map(|(day, state)| match state {
                DayState::Blocked { restriction_id } if !keep.contains(day) => Some(*restriction_id),
                _ => None,
            })
            .collect();
        // Checked days of a block that goes are blocked again one by one.
        let new_days: Vec<NaiveDate> = keep
            .iter()
            .copied()
            .filter(|d| match calendar.state(*d) {
                Some(DayState::Free) => true,
                Some(DayState::Blocked { restriction_id }) => deselected.contains(&restriction_id),
                _ => false,
            })
            .collect();

        let mut changes = BlockChanges::default();
        for id in deselected {
            match self.remove_block(id).await {
                Ok(()) => changes.removed.push(id),
                Err(BookingError::NotFound { .. }) => {
                    tracing::warn!(room_id, restriction_id = id, "block already gone");
                }
                Err(e) => return Err(e),
            }
        }
        for day in new_days {
            match self.add_block(room_id, day).await {
                Ok(id) => changes.added.push(id),
                Err(BookingError::Conflict { .. }) => {
                    tracing::warn!(room_id, %day, "day taken before it could be blocked");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            room_id,
            year,
            month,
            added = changes.added.len(),
            removed = changes.removed.len(),
            "owner blocks reconciled"
        );
        Ok(changes)
    }
}
