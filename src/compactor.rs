use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once the WAL has taken more than `threshold` appends since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task checking the compaction threshold periodically.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_STORE_TIMEOUT;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hotel_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> DateRange {
        DateRange::single_day(parse_date(s).unwrap())
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), DEFAULT_STORE_TIMEOUT).unwrap();
        engine.create_room(1, "Attic").await.unwrap();
        for _ in 0..5 {
            let block = engine.add_block(1, d("2024-07-04")).await.unwrap();
            engine.remove_block(block.id).await.unwrap();
        }
        let kept = engine.add_block(1, d("2024-07-05")).await.unwrap();

        assert!(!compact_if_needed(&engine, 100).await);
        assert_eq!(engine.wal_appends_since_compact().await, 12);

        assert!(compact_if_needed(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let events = Wal::replay(&path).unwrap();
        // sequences, room, surviving block
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::IdSequences { next_restriction_id: 7, .. }));
        assert_eq!(events[2], Event::BlockAdded { restriction: kept });
    }
}
