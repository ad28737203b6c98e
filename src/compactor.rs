use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

/// Periodically rewrite the WAL once enough appends have accumulated since
/// the last compaction. Availability rewrites dominate the log, so without
/// this it grows without bound while state stays small.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => tracing::info!(appends, "compacted WAL"),
            Err(e) => tracing::warn!(error = %e, "WAL compaction failed"),
        }
    }
}
