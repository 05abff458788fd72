use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::session::SessionStore;
use crate::store::DurableStore;

/// Background task that periodically drops idle sessions.
pub async fn run_session_reaper(sessions: Arc<SessionStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let swept = sessions.sweep_expired();
        if swept > 0 {
            info!("reaped {swept} expired sessions");
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up since
/// the last compaction.
pub async fn run_compactor(store: Arc<DurableStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(store: &DurableStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
