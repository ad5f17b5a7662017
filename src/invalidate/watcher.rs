//! File-system watcher feeding the invalidator.
//!
//! One recursive watch on the content root, one owned task draining events.
//! Recursive mode extends to directories created after startup. Every
//! create/write/remove/rename event invalidates the affected logical path
//! and refreshes its version record.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::cache::AssetCache;
use crate::error::ServeError;
use crate::version::{VersionIndex, to_logical_path};

use super::{invalidate_entries, refresh_version_record};

/// Handle owning the watcher task; dropping the handle without `stop` leaks
/// the task for the process lifetime, so the server stops it on shutdown.
pub struct WatcherHandle {
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    /// Cancel the watcher task and wait for it to wind down. The underlying
    /// file-system watch is dropped with the task.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Start watching `root` (canonical) and spawn the event-draining task.
pub fn spawn_watcher(
    root: PathBuf,
    cache: Arc<dyn AssetCache>,
    versions: Arc<VersionIndex>,
) -> Result<WatcherHandle, ServeError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut watcher =
        notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            let _ = tx.send(result);
        })
        .map_err(|err| {
            ServeError::server("invalidate.watch", format!("failed to create watcher: {err}"))
        })?;

    watcher.watch(&root, RecursiveMode::Recursive).map_err(|err| {
        ServeError::server(
            "invalidate.watch",
            format!("failed to watch {}: {err}", root.display()),
        )
    })?;

    info!(
        target: "statico::invalidate",
        root = %root.display(),
        "file watcher started"
    );

    let task = tokio::spawn(async move {
        // The watch lives exactly as long as this task.
        let _watcher = watcher;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(event) => handle_event(&root, &cache, &versions, event).await,
                Err(err) => {
                    warn!(
                        target: "statico::invalidate",
                        error = %err,
                        "file watcher error"
                    );
                }
            }
        }
    });

    Ok(WatcherHandle { task })
}

async fn handle_event(
    root: &PathBuf,
    cache: &Arc<dyn AssetCache>,
    versions: &Arc<VersionIndex>,
    event: Event,
) {
    // Create, data writes, renames, and removals all change what a path
    // serves; access and metadata-only events do not.
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    if !relevant {
        return;
    }

    for path in &event.paths {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let logical = to_logical_path(relative);
        debug!(
            target: "statico::invalidate",
            path = %logical,
            kind = ?event.kind,
            "invalidating after file-system event"
        );

        invalidate_entries(cache, &logical);
        refresh_version_record(versions, root, &logical).await;
    }
}
