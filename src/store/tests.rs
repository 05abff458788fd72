use std::path::PathBuf;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_test::{assert_pending, assert_ready_ok};

use super::*;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn span(a: &str, b: &str) -> DateSpan {
    DateSpan::new(d(a), d(b))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("bookings_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn guest(first: &str) -> GuestDetails {
    GuestDetails {
        first_name: first.into(),
        last_name: "Smith".into(),
        email: format!("{}@example.com", first.to_lowercase()),
        phone: "555-0100".into(),
    }
}

async fn book(store: &dyn BookingStore, room_id: RoomId, s: DateSpan) -> (ReservationId, RestrictionId) {
    let rid = store
        .insert_reservation(NewReservation {
            guest: guest("Jane"),
            room_id,
            span: s,
        })
        .await
        .unwrap();
    let xid = store
        .insert_restriction(NewRestriction::for_reservation(room_id, s, rid))
        .await
        .unwrap();
    (rid, xid)
}

// ── Shared behavior, run against both backends ───────────

async fn check_overlap_rejected_touching_allowed(store: &dyn BookingStore) {
    let room = store.insert_room("General's Quarters").await.unwrap();
    book(store, room.id, span("2025-01-10", "2025-01-15")).await;

    let err = store
        .insert_restriction(NewRestriction {
            room_id: room.id,
            span: span("2025-01-14", "2025-01-16"),
            reservation_id: None,
            kind: RestrictionKind::OwnerBlock,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Overlap { room_id, .. } if room_id == room.id));

    store
        .insert_restriction(NewRestriction::owner_block(room.id, d("2025-01-15")).unwrap())
        .await
        .unwrap();
    store
        .insert_restriction(NewRestriction::owner_block(room.id, d("2025-01-09")).unwrap())
        .await
        .unwrap();

    let hits = store
        .room_restrictions_overlapping(room.id, span("2025-01-01", "2025-02-01"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
}

async fn check_rejects_bad_references(store: &dyn BookingStore) {
    let room = store.insert_room("Major's Suite").await.unwrap();

    let err = store
        .insert_restriction(NewRestriction::owner_block(999, d("2025-01-01")).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { what: "room", id: 999 }));

    let err = store
        .insert_restriction(NewRestriction::for_reservation(room.id, span("2025-01-01", "2025-01-02"), 42))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { what: "reservation", id: 42 }));

    let err = store
        .insert_restriction(NewRestriction {
            room_id: room.id,
            span: span("2025-01-02", "2025-01-02"),
            reservation_id: None,
            kind: RestrictionKind::OwnerBlock,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::EmptySpan(_)));

    let err = store
        .insert_reservation(NewReservation {
            guest: guest("Jane"),
            room_id: 999,
            span: span("2025-01-01", "2025-01-02"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { what: "room", .. }));

    assert!(matches!(
        store.delete_restriction(777).await,
        Err(StoreError::NotFound { what: "restriction", .. })
    ));
    assert!(matches!(
        store.set_processed(777, true).await,
        Err(StoreError::NotFound { what: "reservation", .. })
    ));
}

async fn check_delete_reservation_cascades(store: &dyn BookingStore) {
    let room = store.insert_room("General's Quarters").await.unwrap();
    let (rid, xid) = book(store, room.id, span("2025-02-01", "2025-02-04")).await;
    let block = store
        .insert_restriction(NewRestriction::owner_block(room.id, d("2025-02-10")).unwrap())
        .await
        .unwrap();

    store.delete_reservation(rid).await.unwrap();

    assert!(store.get_reservation(rid).await.unwrap().is_none());
    assert!(store.get_restriction(xid).await.unwrap().is_none());
    assert!(store.get_restriction(block).await.unwrap().is_some());
    assert!(matches!(
        store.delete_reservation(rid).await,
        Err(StoreError::NotFound { .. })
    ));
}

async fn check_reservation_rows(store: &dyn BookingStore) {
    let a = store.insert_room("General's Quarters").await.unwrap();
    let b = store.insert_room("Major's Suite").await.unwrap();
    let (late, _) = book(store, a.id, span("2025-06-10", "2025-06-12")).await;
    let (early, _) = book(store, b.id, span("2025-06-01", "2025-06-03")).await;

    let all = store.list_reservations(ReservationFilter::All).await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![early, late]);
    assert_eq!(all[0].room.as_ref().map(|r| r.name.as_str()), Some("Major's Suite"));

    store.set_processed(early, true).await.unwrap();
    let new = store.list_reservations(ReservationFilter::New).await.unwrap();
    assert_eq!(new.iter().map(|r| r.id).collect::<Vec<_>>(), vec![late]);

    store.update_guest(late, guest("Mary")).await.unwrap();
    let row = store.get_reservation(late).await.unwrap().unwrap();
    assert_eq!(row.first_name, "Mary");
    assert_eq!(row.email, "mary@example.com");
    assert!(!row.processed);
    assert_eq!(row.span(), span("2025-06-10", "2025-06-12"));
}

async fn check_restrictions_overlapping_across_rooms(store: &dyn BookingStore) {
    let a = store.insert_room("A").await.unwrap();
    let b = store.insert_room("B").await.unwrap();
    store
        .insert_restriction(NewRestriction::owner_block(a.id, d("2025-03-02")).unwrap())
        .await
        .unwrap();
    store
        .insert_restriction(NewRestriction::owner_block(b.id, d("2025-03-05")).unwrap())
        .await
        .unwrap();

    let hits = store
        .restrictions_overlapping(span("2025-03-01", "2025-03-05"))
        .await
        .unwrap();
    assert_eq!(hits.iter().map(|r| r.room_id).collect::<Vec<_>>(), vec![a.id]);
    assert!(store
        .restrictions_overlapping(span("2025-03-03", "2025-03-03"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn memory_overlap_rejected_touching_allowed() {
    check_overlap_rejected_touching_allowed(&MemoryStore::new()).await;
}

#[tokio::test]
async fn durable_overlap_rejected_touching_allowed() {
    let store = DurableStore::open(test_wal_path("overlap.wal")).unwrap();
    check_overlap_rejected_touching_allowed(&store).await;
}

#[tokio::test]
async fn memory_rejects_bad_references() {
    check_rejects_bad_references(&MemoryStore::new()).await;
}

#[tokio::test]
async fn durable_rejects_bad_references() {
    let store = DurableStore::open(test_wal_path("bad_refs.wal")).unwrap();
    check_rejects_bad_references(&store).await;
}

#[tokio::test]
async fn memory_delete_reservation_cascades() {
    check_delete_reservation_cascades(&MemoryStore::new()).await;
}

#[tokio::test]
async fn durable_delete_reservation_cascades() {
    let store = DurableStore::open(test_wal_path("cascade.wal")).unwrap();
    check_delete_reservation_cascades(&store).await;
}

#[tokio::test]
async fn memory_reservation_rows() {
    check_reservation_rows(&MemoryStore::new()).await;
}

#[tokio::test]
async fn durable_reservation_rows() {
    let store = DurableStore::open(test_wal_path("rows.wal")).unwrap();
    check_reservation_rows(&store).await;
}

#[tokio::test]
async fn memory_restrictions_overlapping_across_rooms() {
    check_restrictions_overlapping_across_rooms(&MemoryStore::new()).await;
}

#[tokio::test]
async fn durable_restrictions_overlapping_across_rooms() {
    let store = DurableStore::open(test_wal_path("across_rooms.wal")).unwrap();
    check_restrictions_overlapping_across_rooms(&store).await;
}

// ── Durable-only: replay and compaction ──────────────────

#[tokio::test]
async fn durable_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (rid, block) = {
        let store = DurableStore::open(path.clone()).unwrap();
        let room = store.insert_room("General's Quarters").await.unwrap();
        store.insert_room("Major's Suite").await.unwrap();
        let (rid, _) = book(&store, room.id, span("2025-04-01", "2025-04-05")).await;
        let block = store
            .insert_restriction(NewRestriction::owner_block(room.id, d("2025-04-10")).unwrap())
            .await
            .unwrap();
        store.set_processed(rid, true).await.unwrap();
        (rid, block)
    };

    let store = DurableStore::open(path).unwrap();
    let rooms = store.list_rooms().await.unwrap();
    assert_eq!(rooms.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec![
        "General's Quarters",
        "Major's Suite"
    ]);
    let row = store.get_reservation(rid).await.unwrap().unwrap();
    assert!(row.processed);
    assert!(store.get_restriction(block).await.unwrap().is_some());

    // Replayed calendars still enforce the overlap rule.
    let err = store
        .insert_restriction(NewRestriction::owner_block(1, d("2025-04-03")).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Overlap { .. }));

    // Counters resume past every replayed id.
    let room = store.insert_room("Colonel's Cabin").await.unwrap();
    assert_eq!(room.id, 3);
    let next = store
        .insert_restriction(NewRestriction::owner_block(room.id, d("2025-04-01")).unwrap())
        .await
        .unwrap();
    assert!(next > block);
}

#[tokio::test]
async fn durable_replay_applies_cascade() {
    let path = test_wal_path("replay_cascade.wal");
    let xid = {
        let store = DurableStore::open(path.clone()).unwrap();
        let room = store.insert_room("A").await.unwrap();
        let (rid, xid) = book(&store, room.id, span("2025-05-01", "2025-05-03")).await;
        store.delete_reservation(rid).await.unwrap();
        xid
    };

    let store = DurableStore::open(path).unwrap();
    assert!(store.get_restriction(xid).await.unwrap().is_none());
    assert!(store.list_reservations(ReservationFilter::All).await.unwrap().is_empty());
    store
        .insert_restriction(NewRestriction::owner_block(1, d("2025-05-01")).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn durable_compaction_preserves_state_and_ids() {
    let path = test_wal_path("compact.wal");
    let kept = {
        let store = DurableStore::open(path.clone()).unwrap();
        let room = store.insert_room("A").await.unwrap();
        let (gone, _) = book(&store, room.id, span("2025-07-01", "2025-07-03")).await;
        let (kept, _) = book(&store, room.id, span("2025-07-05", "2025-07-06")).await;
        store.delete_reservation(gone).await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 6);

        store.compact().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);
        kept
    };

    let store = DurableStore::open(path).unwrap();
    let all = store.list_reservations(ReservationFilter::All).await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![kept]);

    // The deleted reservation's id is never handed out again.
    let (fresh, _) = book(&store, 1, span("2025-07-01", "2025-07-03")).await;
    assert!(fresh > kept);
}

#[tokio::test]
async fn durable_concurrent_appends_all_replay() {
    let path = test_wal_path("group_commit.wal");
    let store = Arc::new(DurableStore::open(path.clone()).unwrap());
    let room = store.insert_room("A").await.unwrap();

    let mut handles = Vec::new();
    for day in 1..=20u32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let date = NaiveDate::from_ymd_opt(2025, 8, day).unwrap();
            store
                .insert_restriction(NewRestriction::owner_block(room.id, date).unwrap())
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let replayed = DurableStore::open(path).unwrap();
    let hits = replayed
        .room_restrictions_overlapping(room.id, span("2025-08-01", "2025-09-01"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 20);
    assert!(hits.windows(2).all(|w| w[0].start_date < w[1].start_date));
}

// ── Invariants ───────────────────────────────────────────

#[tokio::test]
async fn accepted_restrictions_never_overlap() {
    let store = MemoryStore::with_rooms(&["A", "B"]).await.unwrap();
    let base = d("2025-01-01");
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..400 {
        let room_id: RoomId = rng.gen_range(1..=2);
        let start = base + chrono::Days::new(rng.gen_range(0..90));
        let end = start + chrono::Days::new(rng.gen_range(0..6));
        let _ = store
            .insert_restriction(NewRestriction {
                room_id,
                span: DateSpan::new(start, end),
                reservation_id: None,
                kind: RestrictionKind::OwnerBlock,
            })
            .await;
    }

    for room_id in [1, 2] {
        let rows = store
            .room_restrictions_overlapping(room_id, span("2024-01-01", "2026-01-01"))
            .await
            .unwrap();
        assert!(!rows.is_empty());
        for (i, a) in rows.iter().enumerate() {
            assert!(!a.span().is_empty());
            for b in &rows[i + 1..] {
                assert!(!a.span().overlaps(&b.span()), "{} overlaps {}", a.span(), b.span());
            }
        }
    }
}

#[tokio::test]
async fn room_lock_serializes_holders() {
    let store = MemoryStore::with_rooms(&["A"]).await.unwrap();
    let first = store.lock_room(1).await.unwrap();
    assert_eq!(first.room_id(), 1);

    let mut contender = tokio_test::task::spawn(store.lock_room(1));
    assert_pending!(contender.poll());

    // Another room is independent.
    let other = store.lock_room(2).await.unwrap();
    assert_eq!(other.room_id(), 2);

    drop(first);
    assert!(contender.is_woken());
    let second = assert_ready_ok!(contender.poll());
    assert_eq!(second.room_id(), 1);
}

#[tokio::test]
async fn bounded_times_out_slow_calls() {
    let slow = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<_, StoreError>(1)
    };
    let err = bounded("slow_op", Duration::from_millis(10), slow).await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout { op: "slow_op" }));

    let fast = async { Ok::<_, StoreError>(2) };
    assert_eq!(bounded("fast_op", Duration::from_secs(1), fast).await.unwrap(), 2);
}
