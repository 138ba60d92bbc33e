//! Locally persisted set of message ids the user has opened.
//!
//! Folder listings cannot report per-recipient read state, so the client
//! remembers which messages it has opened and overlays that on every
//! listing. The cache is advisory: a missing or corrupt file starts it
//! empty.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use maillite_proto::MessageSummary;

use crate::Result;

mod store;

pub use store::FORMAT_VERSION;

/// Set of message ids marked read locally.
#[derive(Debug, Clone, Default)]
pub struct ReadStateCache {
    ids: BTreeSet<String>,
    path: Option<PathBuf>,
}

impl ReadStateCache {
    /// Creates an empty cache that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the cache persisted at `path`.
    ///
    /// Never fails: a missing file yields an empty cache, and an unreadable
    /// or corrupt one is logged and replaced on the next write.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match store::read(&path).await {
            Ok(Some(ids)) => {
                tracing::debug!(path = %path.display(), count = ids.len(), "Loaded read state");
                ids
            }
            Ok(None) => {
                tracing::debug!(path = %path.display(), "No read state yet");
                BTreeSet::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable read state");
                BTreeSet::new()
            }
        };

        Self {
            ids,
            path: Some(path),
        }
    }

    /// Returns the file backing this cache, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true if `id` has been marked read.
    #[must_use]
    pub fn is_seen(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of ids in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no id has been marked read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records `id` as read and persists the set if it changed.
    ///
    /// Returns true if the id was not already present. The id stays in
    /// memory even if persisting fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be written.
    pub async fn mark_seen(&mut self, id: &str) -> Result<bool> {
        if !self.ids.insert(id.to_string()) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            store::write(path, &self.ids).await?;
        }
        Ok(true)
    }

    /// Sets the read flag on every summary whose id is in the cache.
    ///
    /// Flags already set by the listing are left alone.
    pub fn merge(&self, summaries: &mut [MessageSummary]) {
        for summary in summaries {
            if self.is_seen(&summary.id) {
                summary.read = true;
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn summary(id: &str, read: bool) -> MessageSummary {
        MessageSummary {
            id: id.into(),
            from: "bob".into(),
            size: 1,
            timestamp_ms: 1700000000000,
            subject: "Hi".into(),
            read,
        }
    }

    #[tokio::test]
    async fn test_mark_seen_twice_persists_one_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read_state.json");

        let mut cache = ReadStateCache::load(&path).await;
        assert!(cache.is_empty());
        assert!(cache.mark_seen("42").await.unwrap());
        assert!(!cache.mark_seen("42").await.unwrap());
        assert_eq!(cache.len(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("\"42\"").count(), 1);

        let reloaded = ReadStateCache::load(&path).await;
        assert!(reloaded.is_seen("42"));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read_state.json");
        std::fs::write(&path, b"\xac\xed\x00\x05 not json").unwrap();

        let mut cache = ReadStateCache::load(&path).await;
        assert!(cache.is_empty());

        // The next write replaces the corrupt file.
        cache.mark_seen("7").await.unwrap();
        assert!(ReadStateCache::load(&path).await.is_seen("7"));
    }

    #[tokio::test]
    async fn test_unknown_version_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read_state.json");
        std::fs::write(&path, r#"{"version": 99, "ids": ["1"]}"#).unwrap();

        assert!(ReadStateCache::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state").join("read.json");

        let mut cache = ReadStateCache::load(&path).await;
        cache.mark_seen("1").await.unwrap();
        assert!(path.exists());
        assert_eq!(cache.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_in_memory_never_writes() {
        let mut cache = ReadStateCache::in_memory();
        assert!(cache.mark_seen("1").await.unwrap());
        assert!(cache.is_seen("1"));
        assert!(cache.path().is_none());
    }

    #[tokio::test]
    async fn test_merge() {
        let mut cache = ReadStateCache::in_memory();
        cache.mark_seen("2").await.unwrap();

        let mut summaries = vec![summary("1", false), summary("2", false), summary("3", true)];
        cache.merge(&mut summaries);

        let flags: Vec<_> = summaries.iter().map(|s| s.read).collect();
        assert_eq!(flags, vec![false, true, true]);
    }
}
