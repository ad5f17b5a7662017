//! Cache invalidation.
//!
//! A change to a file must remove every cache entry keyed on its logical
//! path (all encodings, both flavors) and, when the path participates in
//! versioning, refresh its version record from the new bytes. The watcher
//! drives this from file-system events; [`ManualInvalidator`] offers the
//! same surface to embedders.

mod watcher;

pub use watcher::{WatcherHandle, spawn_watcher};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{AssetCache, AssetKey};
use crate::version::VersionIndex;

const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(5);
const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Remove every cache entry for a logical path.
pub fn invalidate_entries(cache: &Arc<dyn AssetCache>, logical: &str) {
    for key in AssetKey::all_variants(logical) {
        cache.delete(&key);
    }
}

/// Bring the version record for a changed path back in sync with disk:
/// re-register from fresh bytes, or drop the record when the file is gone.
pub async fn refresh_version_record(versions: &VersionIndex, root: &Path, logical: &str) {
    if !versions.enabled() || !versions.is_versionable(logical) {
        return;
    }

    let full_path = root.join(logical.trim_start_matches('/'));
    match read_with_retry(&full_path).await {
        Ok(Some(content)) => versions.register(logical, &content),
        Ok(None) => {
            versions.remove(logical);
            debug!(
                target: "statico::invalidate",
                path = %logical,
                "removed version record for deleted file"
            );
        }
        Err(err) => {
            warn!(
                target: "statico::invalidate",
                path = %logical,
                error = %err,
                "failed to refresh version record after retries"
            );
        }
    }
}

/// Read a file that may be mid-write, retrying with exponential backoff
/// (100 ms initial, doubling, 5 s cap, 3 attempts).
///
/// Returns `Ok(None)` when the file no longer exists. Permission failures
/// are not transient and short-circuit immediately.
pub async fn read_with_retry(path: &Path) -> Result<Option<Vec<u8>>, std::io::Error> {
    let mut backoff = RETRY_INITIAL_BACKOFF;
    let mut attempt = 0u32;

    loop {
        match tokio::fs::read(path).await {
            Ok(content) => return Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= RETRY_MAX_ATTEMPTS {
                    return Err(err);
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_MAX_BACKOFF);
            }
        }
    }
}

/// Invalidation surface for embedders that signal changes themselves.
pub struct ManualInvalidator {
    cache: Arc<dyn AssetCache>,
    versions: Arc<VersionIndex>,
    root: Arc<std::path::PathBuf>,
}

impl ManualInvalidator {
    pub fn new(
        cache: Arc<dyn AssetCache>,
        versions: Arc<VersionIndex>,
        root: Arc<std::path::PathBuf>,
    ) -> Self {
        Self {
            cache,
            versions,
            root,
        }
    }

    /// Invalidate one logical path and refresh its version record.
    pub async fn invalidate(&self, logical: &str) {
        invalidate_entries(&self.cache, logical);
        refresh_version_record(&self.versions, &self.root, logical).await;
    }

    /// Drop the entire cache.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}
