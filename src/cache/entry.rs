//! Cache key and entry definitions for the response store.

use std::time::{Instant, SystemTime};

use bytes::Bytes;

use crate::compress::Encoding;

/// Identifies one cached response artifact.
///
/// The versioned flag discriminates the two URL flavors a path can be served
/// under: versioned responses carry immutable cache headers and skip HTML
/// rewriting, so they must never share an entry with the logical flavor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetKey {
    pub path: String,
    pub encoding: Encoding,
    pub versioned: bool,
}

impl AssetKey {
    pub fn new(path: impl Into<String>, encoding: Encoding, versioned: bool) -> Self {
        Self {
            path: path.into(),
            encoding,
            versioned,
        }
    }

    /// Every key a logical path may be cached under, across all encodings
    /// and both flavors. Invalidation fans out over this set.
    pub fn all_variants(path: &str) -> impl Iterator<Item = AssetKey> + '_ {
        Encoding::ALL.into_iter().flat_map(move |encoding| {
            [false, true]
                .into_iter()
                .map(move |versioned| AssetKey::new(path, encoding, versioned))
        })
    }
}

/// A stored response artifact.
#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub bytes: Bytes,
    pub content_type: String,
    /// Encoding actually applied to `bytes`; may differ from the key's
    /// negotiated encoding when compression was skipped or failed.
    pub encoding: Encoding,
    /// Quoted hex digest of the response body.
    pub etag: String,
    pub last_modified: SystemTime,
    /// Stamped by the store on insertion; drives TTL expiry.
    pub created_at: Instant,
    pub access_count: u64,
}

impl AssetEntry {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: u64,
    pub item_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_covers_every_encoding_and_flavor() {
        let keys: Vec<AssetKey> = AssetKey::all_variants("/app.js").collect();
        assert_eq!(keys.len(), 6);
        for encoding in Encoding::ALL {
            for versioned in [false, true] {
                assert!(keys.contains(&AssetKey::new("/app.js", encoding, versioned)));
            }
        }
    }

    #[test]
    fn key_flavors_are_distinct() {
        let logical = AssetKey::new("/app.js", Encoding::Gzip, false);
        let versioned = AssetKey::new("/app.js", Encoding::Gzip, true);
        assert_ne!(logical, versioned);
    }
}
