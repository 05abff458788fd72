use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::*;
use crate::store::{BookingStore, StoreError, bounded};

/// Read-only answers about which rooms are free for a date range, computed
/// from existing restriction intervals. Never mutates the store.
#[derive(Clone)]
pub struct AvailabilityEngine {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
}

impl AvailabilityEngine {
    pub fn new(store: Arc<dyn BookingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// True iff no restriction on `room_id` overlaps `span`. A zero-length
    /// span overlaps nothing and is always available.
    pub async fn is_room_available(&self, room_id: RoomId, span: DateSpan) -> Result<bool, StoreError> {
        timed("room", async {
            if span.is_empty() {
                return Ok(true);
            }
            let hits = bounded(
                "room_restrictions_overlapping",
                self.timeout,
                self.store.room_restrictions_overlapping(room_id, span),
            )
            .await?;
            Ok(hits.is_empty())
        })
        .await
    }

    /// Rooms with no restriction overlapping `span`, ordered by room id.
    /// An empty result means nothing is free; it is not an error.
    pub async fn available_rooms(&self, span: DateSpan) -> Result<Vec<Room>, StoreError> {
        timed("all_rooms", async {
            let rooms = bounded("list_rooms", self.timeout, self.store.list_rooms()).await?;
            if span.is_empty() {
                return Ok(rooms);
            }
            let taken: HashSet<RoomId> = bounded(
                "restrictions_overlapping",
                self.timeout,
                self.store.restrictions_overlapping(span),
            )
            .await?
            .into_iter()
            .map(|r| r.room_id)
            .collect();
            Ok(rooms.into_iter().filter(|r| !taken.contains(&r.id)).collect())
        })
        .await
    }

    /// The sub-ranges of `window` in which `room_id` has no restriction.
    pub async fn free_spans(&self, room_id: RoomId, window: DateSpan) -> Result<Vec<DateSpan>, StoreError> {
        timed("free_spans", async {
            if window.is_empty() {
                return Ok(Vec::new());
            }
            let mut busy: Vec<DateSpan> = bounded(
                "room_restrictions_overlapping",
                self.timeout,
                self.store.room_restrictions_overlapping(room_id, window),
            )
            .await?
            .iter()
            .filter_map(|r| r.span().intersect(&window))
            .collect();
            busy.sort_by_key(|s| s.start);
            Ok(subtract_spans(&[window], &merge_overlapping(&busy)))
        })
        .await
    }
}

/// Answered queries are counted and timed, short-circuited ones included.
async fn timed<T>(kind: &'static str, query: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
    let started = Instant::now();
    let result = query.await;
    if result.is_ok() {
        metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL, "kind" => kind).increment(1);
        metrics::histogram!(crate::observability::AVAILABILITY_QUERY_DURATION_SECONDS, "kind" => kind)
            .record(started.elapsed().as_secs_f64());
    }
    result
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[DateSpan]) -> Vec<DateSpan> {
    let mut merged: Vec<DateSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start, `to_remove` disjoint.
pub fn subtract_spans(base: &[DateSpan], to_remove: &[DateSpan]) -> Vec<DateSpan> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateSpan::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateSpan::new(current_start, current_end));
        }
    }

    result
}
