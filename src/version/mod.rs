//! Asset version index.
//!
//! Maintains the bidirectional mapping between logical paths and their
//! content-hashed URLs, plus the per-asset hash itself. The three maps are
//! guarded by a single lock so a registration is always observed as an
//! atomic triple. Versioned paths are synthetic: they are never written to
//! disk and always resolve back to the underlying file.

mod rewrite;

pub use rewrite::HtmlRewriter;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::VersioningSettings;

const SOURCE: &str = "version::index";

/// Extensions eligible for content-hash versioning.
pub const VERSIONABLE_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".mjs", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".woff",
    ".woff2", ".ttf", ".otf", ".eot",
];

struct VersionMaps {
    /// logical → versioned
    versioned: HashMap<String, String>,
    /// versioned → logical
    original: HashMap<String, String>,
    /// logical → content hash
    hashes: HashMap<String, String>,
}

pub struct VersionIndex {
    maps: RwLock<VersionMaps>,
    settings: VersioningSettings,
}

impl VersionIndex {
    pub fn new(settings: VersioningSettings) -> Self {
        Self {
            maps: RwLock::new(VersionMaps {
                versioned: HashMap::new(),
                original: HashMap::new(),
                hashes: HashMap::new(),
            }),
            settings,
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enable
    }

    // The triple must stay readable even after a registration panics with
    // the lock held; a partially-applied triple only yields a stale
    // versioned URL until the next registration, never a wrong file.
    fn maps_read(&self, op: &'static str) -> RwLockReadGuard<'_, VersionMaps> {
        self.maps.read().unwrap_or_else(|poisoned| {
            warn!(op, "version index lock poisoned; reading recovered maps");
            poisoned.into_inner()
        })
    }

    fn maps_write(&self, op: &'static str) -> RwLockWriteGuard<'_, VersionMaps> {
        self.maps.write().unwrap_or_else(|poisoned| {
            warn!(op, "version index lock poisoned; updating recovered maps");
            poisoned.into_inner()
        })
    }

    /// Truncated hex digest of the file bytes. Deterministic: identical
    /// bytes always produce the identical hash.
    pub fn content_hash(&self, content: &[u8]) -> String {
        let digest = Sha256::digest(content);
        hex::encode(&digest[..self.settings.hash_length / 2])
    }

    fn versioned_for(&self, logical: &str, hash: &str) -> String {
        let (base, ext) = split_extension(logical);
        if self.settings.pattern.is_empty() {
            format!("{base}.{hash}{ext}")
        } else {
            self.settings
                .pattern
                .replace("{base}", base)
                .replace("{hash}", hash)
                .replace("{ext}", ext)
        }
    }

    /// Record `logical` with the hash of `content`, overwriting any previous
    /// registration and dropping its stale inverse mapping.
    pub fn register(&self, logical: &str, content: &[u8]) {
        let hash = self.content_hash(content);
        let versioned = self.versioned_for(logical, &hash);

        let mut maps = self.maps_write("register");

        let prefix = self.settings.url_prefix.as_str();
        if prefix.is_empty() {
            if let Some(stale) = maps.versioned.insert(logical.to_string(), versioned.clone())
                && stale != versioned
            {
                maps.original.remove(&stale);
            }
            maps.original.insert(versioned.clone(), logical.to_string());
            maps.hashes.insert(logical.to_string(), hash);
        } else {
            // Serve-prefix deployments also register prefixed aliases so that
            // HTML references written against the public URL space resolve.
            let prefixed_logical = format!("{prefix}{logical}");
            let prefixed_versioned = format!("{prefix}{versioned}");

            for (key, value) in [
                (logical.to_string(), versioned.clone()),
                (prefixed_logical.clone(), prefixed_versioned.clone()),
            ] {
                if let Some(stale) = maps.versioned.insert(key, value.clone())
                    && stale != value
                {
                    maps.original.remove(&stale);
                }
            }
            maps.original.insert(versioned.clone(), logical.to_string());
            maps.original
                .insert(prefixed_versioned, logical.to_string());
            maps.hashes.insert(logical.to_string(), hash.clone());
            maps.hashes.insert(prefixed_logical, hash);
        }

        debug!(
            target_module = SOURCE,
            logical,
            versioned = %versioned,
            "registered versioned asset"
        );
    }

    pub fn versioned(&self, logical: &str) -> Option<String> {
        self.maps_read("versioned")
            .versioned
            .get(logical)
            .cloned()
    }

    pub fn original(&self, versioned: &str) -> Option<String> {
        self.maps_read("original")
            .original
            .get(versioned)
            .cloned()
    }

    pub fn hash_of(&self, logical: &str) -> Option<String> {
        self.maps_read("hash_of")
            .hashes
            .get(logical)
            .cloned()
    }

    pub fn is_versioned(&self, path: &str) -> bool {
        self.maps_read("is_versioned")
            .original
            .contains_key(path)
    }

    /// Drop every mapping for `logical`, including prefixed aliases.
    pub fn remove(&self, logical: &str) {
        let mut maps = self.maps_write("remove");

        if let Some(versioned) = maps.versioned.remove(logical) {
            maps.original.remove(&versioned);
        }
        maps.hashes.remove(logical);

        let prefix = self.settings.url_prefix.as_str();
        if !prefix.is_empty() {
            let prefixed_logical = format!("{prefix}{logical}");
            if let Some(versioned) = maps.versioned.remove(&prefixed_logical) {
                maps.original.remove(&versioned);
            }
            maps.hashes.remove(&prefixed_logical);
        }
    }

    /// Whether a logical path participates in versioning: it must sit under
    /// a configured static prefix and carry a versionable extension.
    pub fn is_versionable(&self, path: &str) -> bool {
        let under_prefix = self
            .settings
            .static_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()));
        if !under_prefix {
            return false;
        }

        let (_, ext) = split_extension(path);
        let ext = ext.to_ascii_lowercase();
        VERSIONABLE_EXTENSIONS.contains(&ext.as_str())
    }

    /// Walk `root` and register every versionable file found.
    ///
    /// Unreadable files and walk errors are skipped; the scan registers what
    /// it can and reports how much that was.
    pub fn scan(&self, root: &Path) -> usize {
        if !self.settings.enable {
            return 0;
        }

        let mut scanned = 0usize;
        let mut registered = 0usize;

        for item in WalkDir::new(root) {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    debug!(target_module = SOURCE, error = %err, "skipping unreadable walk entry");
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            scanned += 1;

            let Ok(relative) = item.path().strip_prefix(root) else {
                continue;
            };
            let logical = to_logical_path(relative);
            if !self.is_versionable(&logical) {
                continue;
            }

            match std::fs::read(item.path()) {
                Ok(content) => {
                    self.register(&logical, &content);
                    registered += 1;
                }
                Err(err) => {
                    debug!(
                        target_module = SOURCE,
                        path = %logical,
                        error = %err,
                        "skipping unreadable file during scan"
                    );
                }
            }
        }

        info!(
            target_module = SOURCE,
            scanned, registered, "version index scan complete"
        );
        registered
    }
}

/// Forward-slashed, `/`-prefixed logical path for a root-relative file.
pub(crate) fn to_logical_path(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

/// Split a path into `(base, extension)` where the extension keeps its dot.
fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map_or(0, |idx| idx + 1);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => path.split_at(name_start + dot),
        _ => (path, ""),
    }
}
