//! In memory cache of overlay schemas.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;

use crate::error::OverlayError;
use crate::index::ExtensionFieldIndex;
use crate::schema::OverlaySchema;
use crate::schema::SchemaHash;

pub(crate) const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(32) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// A merged schema together with the index derived from it.
///
/// Both are built together and never patched independently.
#[derive(Debug, Clone)]
pub(crate) struct Overlay {
    pub(crate) schema: OverlaySchema,
    pub(crate) index: Arc<ExtensionFieldIndex>,
}

/// Overlays keyed by the hash of the extension SDL they were built from.
///
/// Lookups only take the read lock. Building happens without any lock held,
/// so concurrent callers may build the same overlay; the first one inserted
/// is the one every caller gets.
pub(crate) struct OverlayCache {
    inner: RwLock<LruCache<SchemaHash, Overlay>>,
}

impl OverlayCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Cache key for a list of extension documents.
    pub(crate) fn key<S: AsRef<str>>(extensions: &[S]) -> SchemaHash {
        let joined = extensions
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\0");
        SchemaHash::new(&joined)
    }

    pub(crate) fn get(&self, key: &SchemaHash) -> Option<Overlay> {
        self.inner.read().peek(key).cloned()
    }

    /// The cached overlay for `key`, building and caching it on a miss.
    /// Errors are not cached.
    pub(crate) fn get_or_build(
        &self,
        key: SchemaHash,
        build: impl FnOnce() -> Result<Overlay, OverlayError>,
    ) -> Result<Overlay, OverlayError> {
        if let Some(overlay) = self.get(&key) {
            tracing::trace!(%key, "overlay cache hit");
            return Ok(overlay);
        }
        tracing::debug!(%key, "overlay cache miss");
        let overlay = build()?;

        let mut inner = self.inner.write();
        if let Some(existing) = inner.get(&key) {
            return Ok(existing.clone());
        }
        inner.put(key, overlay.clone());
        Ok(overlay)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }
}

impl Default for OverlayCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
