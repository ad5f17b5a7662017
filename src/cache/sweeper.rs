//! Background TTL sweeper.
//!
//! Expired entries are already treated as misses on lookup; the sweeper
//! reclaims their memory for keys nobody asks for anymore. It ticks at half
//! the TTL and is owned by the caller through its stop handle.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::store::AssetCache;

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(50);

/// Handle to the running sweeper task.
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Cancel the sweeper and wait for it to wind down.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Spawn the sweeper for `cache`, ticking at `ttl / 2`.
pub fn spawn(cache: Arc<dyn AssetCache>, ttl: Duration) -> SweeperHandle {
    let period = (ttl / 2).max(MIN_SWEEP_PERIOD);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // consume the immediate first tick
        loop {
            interval.tick().await;
            let before = cache.stats().item_count;
            cache.remove_expired();
            let after = cache.stats().item_count;
            if before != after {
                debug!(
                    target_module = "cache::sweeper",
                    removed = before - after,
                    remaining = after,
                    "swept expired entries"
                );
            }
        }
    });

    SweeperHandle { task }
}

#[cfg(test)]
mod tests {
    use std::time::{Instant, SystemTime};

    use bytes::Bytes;

    use crate::cache::entry::{AssetEntry, AssetKey};
    use crate::cache::store::LruAssetStore;
    use crate::compress::Encoding;

    use super::*;

    fn entry() -> AssetEntry {
        AssetEntry {
            bytes: Bytes::from_static(b"payload"),
            content_type: "text/plain".to_string(),
            encoding: Encoding::Identity,
            etag: "\"abc\"".to_string(),
            last_modified: SystemTime::UNIX_EPOCH,
            created_at: Instant::now(),
            access_count: 0,
        }
    }

    #[tokio::test]
    async fn sweeper_reclaims_expired_entries() {
        let ttl = Duration::from_millis(40);
        let store: Arc<dyn AssetCache> = Arc::new(LruAssetStore::new(1024, ttl));
        store.set(AssetKey::new("/a", Encoding::Identity, false), entry());

        let handle = spawn(store.clone(), ttl);

        // Give the entry time to expire and the sweeper a few periods to run.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.stats().item_count, 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_the_task() {
        let store: Arc<dyn AssetCache> =
            Arc::new(LruAssetStore::new(1024, Duration::from_secs(300)));
        let handle = spawn(store, Duration::from_secs(300));
        handle.stop().await;
    }
}
