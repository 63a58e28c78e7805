// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Timeline database — maps request keys to open timelines.
//!
//! Keys are sanitized to `[0-9A-Za-z_]` and become nested directories under
//! the root (8 characters per level for the first 32, remainder as a final
//! level), so related keys cluster without overloading any single directory.
//! Open timelines sit in a fixed-capacity LRU; eviction drops the timeline,
//! which unmaps and closes its two files. Each database instance is owned by
//! one worker thread, so no operation is in flight when an eviction runs.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::error::Result;
use crate::require;
use crate::storage::timeline::{DiffResult, GetResult, SummaryResult, Timeline};

// ─────────────────────────────── constants ───────────────────────────────────

const MAX_DIR_LENGTH: usize = 8;
const MAX_DIR_SPLIT_LENGTH: usize = MAX_DIR_LENGTH * 4;

/// Start point lookups and diffs at the beginning of the index.
pub const NO_OFFSET: u64 = 0;

// ─────────────────────────────── key handling ────────────────────────────────

/// Replace every byte outside `[0-9A-Za-z]` with `_`.
///
/// Not injective: distinct inputs may collide on the same sanitized key and
/// therefore share a timeline. Existing deployments depend on that, so the
/// mapping must never change.
pub fn sanitize_key(key: &str) -> String {
    key.bytes()
        .map(|b| if b.is_ascii_alphanumeric() { b as char } else { '_' })
        .collect()
}

/// Derive the on-disk directory for a sanitized key.
fn key_dir(root: &Path, key: &str) -> PathBuf {
    require!(!key.is_empty(), "cannot derive a directory for an empty key");

    let mut path = root.to_path_buf();
    let mut i = 0;
    while i < key.len() && i < MAX_DIR_SPLIT_LENGTH {
        let end = (i + MAX_DIR_LENGTH).min(key.len());
        path.push(&key[i..end]);
        i += MAX_DIR_LENGTH;
    }
    if key.len() > MAX_DIR_SPLIT_LENGTH {
        path.push(&key[MAX_DIR_SPLIT_LENGTH..]);
    }
    path
}

// ─────────────────────────────── TimelineDb ──────────────────────────────────

/// Per-worker cache of open timelines.
pub struct TimelineDb {
    root: PathBuf,
    /// Resolution given to timelines created by this database.
    resolution: u64,
    cache: LruCache<String, Timeline>,
}

impl TimelineDb {
    pub fn new(root: impl Into<PathBuf>, cache_size: usize, resolution: u64) -> Self {
        require!(cache_size > 0, "timeline cache size must be positive");
        require!(resolution > 0, "timeline resolution must be positive");

        TimelineDb {
            root: root.into(),
            resolution,
            cache: LruCache::new(NonZeroUsize::new(cache_size).expect("cache_size is positive")),
        }
    }

    pub fn put(&mut self, key: &str, t: u64, c: i64) -> Result<bool> {
        self.timeline(key)?.put(t, c)
    }

    pub fn get(&mut self, key: &str, t: u64) -> Result<GetResult> {
        Ok(self.timeline(key)?.get(t, NO_OFFSET))
    }

    pub fn diff(&mut self, key: &str, a: u64, b: u64, index_offset: u64) -> Result<DiffResult> {
        Ok(self.timeline(key)?.diff(a, b, index_offset))
    }

    pub fn summary(&mut self, key: &str) -> Result<SummaryResult> {
        Ok(self.timeline(key)?.summary())
    }

    pub fn key_index_size(&mut self, key: &str) -> Result<u64> {
        Ok(self.timeline(key)?.index.len())
    }

    pub fn key_data_size(&mut self, key: &str) -> Result<u64> {
        Ok(self.timeline(key)?.data.len())
    }

    /// Fetch the key's timeline, opening it from disk on a cache miss. The
    /// returned borrow is used to completion within one worker-loop
    /// iteration, so the next eviction can never invalidate a live reference.
    fn timeline(&mut self, key: &str) -> Result<&mut Timeline> {
        require!(!key.is_empty(), "empty timeline key");

        let clean = sanitize_key(key);
        if !self.cache.contains(&clean) {
            let timeline = Timeline::open(&key_dir(&self.root, &clean), self.resolution)?;
            if let Some((evicted, _)) = self.cache.push(clean.clone(), timeline) {
                debug!(key = %evicted, "timeline evicted from cache");
            }
        }
        Ok(self.cache.get_mut(&clean).expect("timeline was just inserted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_passes_alphanumerics() {
        assert_eq!(sanitize_key("abcXYZ019"), "abcXYZ019");
    }

    #[test]
    fn sanitize_replaces_everything_else() {
        assert_eq!(sanitize_key("web.server-1:cpu"), "web_server_1_cpu");
        assert_eq!(sanitize_key("a b\tc"), "a_b_c");
        // One underscore per byte, not per character.
        assert_eq!(sanitize_key("é"), "__");
    }

    #[test]
    fn key_dir_splits_in_groups_of_eight() {
        let root = Path::new("/data");
        assert_eq!(key_dir(root, "short"), Path::new("/data/short"));
        assert_eq!(
            key_dir(root, "abcdefgh01234567"),
            Path::new("/data/abcdefgh/01234567")
        );
        // 32 chars of prefix levels plus the remainder as a final level.
        let long = "aaaaaaaabbbbbbbbccccccccddddddddrest_of_key";
        assert_eq!(
            key_dir(root, long),
            Path::new("/data/aaaaaaaa/bbbbbbbb/cccccccc/dddddddd/rest_of_key")
        );
    }
}
