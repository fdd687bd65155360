//! Fail-soft wrapper around any vector backend.
//!
//! The engine never surfaces transient store errors: reads degrade to
//! empty results, writes are retained in a local overlay cache and the
//! session continues. The overlay also answers `get`/`get_recent` for
//! entries the backend lost.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use super::{VectorHit, VectorResult, VectorSearchOpts, VectorStore};
use crate::memory::MemoryEntry;

#[derive(Default)]
struct Overlay {
    entries: HashMap<String, MemoryEntry>,
    order: Vec<String>,
}

/// Wraps a backend and swallows its failures.
pub struct FailSoftStore {
    inner: Arc<dyn VectorStore>,
    overlay: RwLock<Overlay>,
}

impl FailSoftStore {
    /// Wrap `inner` with fail-soft semantics.
    pub fn new(inner: Arc<dyn VectorStore>) -> Self {
        Self {
            inner,
            overlay: RwLock::new(Overlay::default()),
        }
    }

    /// Number of writes currently parked in the overlay.
    pub fn cached_writes(&self) -> usize {
        self.overlay.read().map(|o| o.entries.len()).unwrap_or(0)
    }

    fn overlay_insert(&self, entry: &MemoryEntry) {
        if let Ok(mut overlay) = self.overlay.write() {
            overlay.order.retain(|id| id != &entry.id);
            overlay.order.push(entry.id.clone());
            overlay.entries.insert(entry.id.clone(), entry.clone());
        }
    }

    fn overlay_get(&self, id: &str) -> Option<MemoryEntry> {
        self.overlay
            .read()
            .ok()
            .and_then(|o| o.entries.get(id).cloned())
    }

    fn overlay_remove(&self, id: &str) -> bool {
        match self.overlay.write() {
            Ok(mut overlay) => {
                overlay.order.retain(|existing| existing != id);
                overlay.entries.remove(id).is_some()
            }
            Err(_) => false,
        }
    }

    fn overlay_recent(&self, k: usize) -> Vec<MemoryEntry> {
        self.overlay
            .read()
            .map(|o| {
                o.order
                    .iter()
                    .rev()
                    .take(k)
                    .filter_map(|id| o.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for FailSoftStore {
    async fn initialize(&self) -> VectorResult<()> {
        if let Err(e) = self.inner.initialize().await {
            warn!("vector store initialize failed, continuing degraded: {e}");
        }
        Ok(())
    }

    async fn insert(&self, entry: &MemoryEntry) -> VectorResult<()> {
        if let Err(e) = self.inner.insert(entry).await {
            warn!(memory_id = %entry.id, "vector store insert failed, caching locally: {e}");
            self.overlay_insert(entry);
        }
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> VectorResult<Vec<VectorHit>> {
        match self.inner.search(query, k).await {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!("vector store search failed, returning empty: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn hybrid_search(
        &self,
        query: &str,
        k: usize,
        opts: &VectorSearchOpts,
    ) -> VectorResult<Vec<VectorHit>> {
        match self.inner.hybrid_search(query, k, opts).await {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!("vector store hybrid search failed, returning empty: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn get(&self, id: &str) -> VectorResult<Option<MemoryEntry>> {
        match self.inner.get(id).await {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => Ok(self.overlay_get(id)),
            Err(e) => {
                warn!(memory_id = %id, "vector store get failed, trying overlay: {e}");
                Ok(self.overlay_get(id))
            }
        }
    }

    async fn get_recent(&self, k: usize) -> VectorResult<Vec<MemoryEntry>> {
        match self.inner.get_recent(k).await {
            Ok(entries) if !entries.is_empty() => Ok(entries),
            Ok(_) => Ok(self.overlay_recent(k)),
            Err(e) => {
                warn!("vector store get_recent failed, using overlay: {e}");
                Ok(self.overlay_recent(k))
            }
        }
    }

    async fn delete(&self, id: &str) -> VectorResult<bool> {
        let overlay_removed = self.overlay_remove(id);
        match self.inner.delete(id).await {
            Ok(removed) => Ok(removed || overlay_removed),
            Err(e) => {
                warn!(memory_id = %id, "vector store delete failed: {e}");
                Ok(overlay_removed)
            }
        }
    }

    async fn count(&self) -> VectorResult<usize> {
        match self.inner.count().await {
            Ok(count) => Ok(count + self.cached_writes()),
            Err(e) => {
                warn!("vector store count failed, using overlay count: {e}");
                Ok(self.cached_writes())
            }
        }
    }

    async fn close(&self) -> VectorResult<()> {
        if let Err(e) = self.inner.close().await {
            warn!("vector store close failed: {e}");
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
