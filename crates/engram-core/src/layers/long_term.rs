//! Long-Term Memory Layer (L3)
//!
//! The bulk durable store. Writes pass through the surprise gate (novelty
//! against the 50 most recent entries plus pattern boost); rejected writes
//! come back as ghost entries so callers observe the decision without any
//! persistence happening. Accepted writes are annotated with surprise,
//! momentum and decay state, written through to the vector store, and
//! mirrored in a local cache that stays authoritative for the session when
//! the backend misbehaves.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, warn};

use crate::memory::{AddOutcome, MemoryEntry};
use crate::surprise::{MOMENTUM_WINDOW, calculate_decay, calculate_momentum, calculate_surprise};
use crate::vector::{VectorSearchOpts, VectorStore};

// ============================================================================
// CONSTANTS
// ============================================================================

/// How many recent entries the surprise gate compares against.
const SURPRISE_WINDOW: usize = 50;

/// Capacity of the recent-surprise ring buffer.
const SURPRISE_RING_CAPACITY: usize = 100;

/// Entries below this decay are dropped from results unless asked for.
const DECAY_FLOOR: f64 = 0.1;

/// Maximum entries a prune pass scans.
const PRUNE_SCAN_WINDOW: usize = 1000;

// ============================================================================
// TYPES
// ============================================================================

/// A long-term query hit with its decay-adjusted score.
#[derive(Debug, Clone)]
pub struct LongTermHit {
    /// The matched entry, `currentDecay` metadata refreshed
    pub entry: MemoryEntry,
    /// `surpriseScore × decay`
    pub effective_score: f64,
    /// Decay factor at query time
    pub decay: f64,
}

/// Tuning for the long-term layer.
#[derive(Debug, Clone)]
pub struct LongTermConfig {
    /// Minimum surprise for a write to persist
    pub surprise_threshold: f64,
    /// Whether rejected writes become ghosts (false stores everything)
    pub filtering_enabled: bool,
    /// Decay half-life in days
    pub half_life_days: f64,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            surprise_threshold: crate::config::DEFAULT_SURPRISE_THRESHOLD,
            filtering_enabled: true,
            half_life_days: crate::config::DEFAULT_DECAY_HALF_LIFE_DAYS,
        }
    }
}

// ============================================================================
// LAYER
// ============================================================================

/// The long-term layer.
pub struct LongTermLayer {
    store: Arc<dyn VectorStore>,
    config: LongTermConfig,
    /// Session-authoritative mirror of every accepted write
    cache: RwLock<HashMap<String, MemoryEntry>>,
    /// Ring of recent surprise scores for O(1) momentum
    recent_surprise: Mutex<VecDeque<f64>>,
}

impl LongTermLayer {
    /// A layer over `store` with the given tuning.
    pub fn new(store: Arc<dyn VectorStore>, config: LongTermConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(HashMap::new()),
            recent_surprise: Mutex::new(VecDeque::with_capacity(SURPRISE_RING_CAPACITY)),
        }
    }

    fn push_surprise(&self, score: f64) -> f64 {
        let mut ring = match self.recent_surprise.lock() {
            Ok(ring) => ring,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.len() == SURPRISE_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(score);
        let scores: Vec<f64> = ring.iter().copied().collect();
        calculate_momentum(&scores, MOMENTUM_WINDOW)
    }

    fn cache_insert(&self, entry: &MemoryEntry) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(entry.id.clone(), entry.clone());
        }
    }

    /// Store an entry through the surprise gate.
    ///
    /// Returns a ghost outcome (`stored = false`) when filtering is on and
    /// the surprise score misses the threshold; the gate's decision is
    /// still fully reported either way.
    pub async fn store(&self, mut entry: MemoryEntry) -> AddOutcome {
        let recent = self
            .store
            .get_recent(SURPRISE_WINDOW)
            .await
            .unwrap_or_default();

        let surprise = calculate_surprise(&entry.content, &recent, self.config.surprise_threshold);
        let momentum = self.push_surprise(surprise.score);

        if !surprise.should_store && self.config.filtering_enabled {
            debug!(
                score = surprise.score,
                novelty = surprise.novelty_score,
                "surprise gate rejected write"
            );
            let ghost = MemoryEntry::ghost(entry.content.clone(), entry.layer);
            return AddOutcome {
                entry: ghost,
                stored: false,
                surprise_score: Some(surprise.score),
                similar_memories: surprise.similar_memories,
            };
        }

        entry.metadata.surprise_score = Some(surprise.score);
        entry.metadata.momentum = Some(momentum);
        entry.metadata.current_decay = Some(1.0);
        entry.metadata.last_accessed = Some(Utc::now());

        if let Err(e) = self.store.insert(&entry).await {
            // Write failures are swallowed; the cache carries the entry
            // for the rest of the session.
            warn!(memory_id = %entry.id, "long-term write-through failed: {e}");
        }
        self.cache_insert(&entry);

        AddOutcome {
            entry,
            stored: true,
            surprise_score: Some(surprise.score),
            similar_memories: surprise.similar_memories,
        }
    }

    /// Store without the gate (imports, explicit layer adds).
    pub async fn store_unfiltered(&self, mut entry: MemoryEntry) -> AddOutcome {
        if entry.metadata.surprise_score.is_none() {
            entry.metadata.surprise_score = Some(1.0);
        }
        entry.metadata.current_decay.get_or_insert(1.0);
        entry.metadata.last_accessed.get_or_insert_with(Utc::now);
        if let Err(e) = self.store.insert(&entry).await {
            warn!(memory_id = %entry.id, "long-term write-through failed: {e}");
        }
        self.cache_insert(&entry);
        AddOutcome::stored(entry)
    }

    /// Decay-aware hybrid query.
    ///
    /// Over-fetches `2 × limit` candidates, re-scores each with
    /// `surpriseScore × decay`, drops entries below the decay floor unless
    /// `include_decayed`, and truncates to `limit`.
    pub async fn query(
        &self,
        text: &str,
        limit: usize,
        include_decayed: bool,
    ) -> Vec<LongTermHit> {
        let opts = VectorSearchOpts::default();
        let candidates = self
            .store
            .hybrid_search(text, limit.saturating_mul(2).max(1), &opts)
            .await
            .unwrap_or_default();

        let now = Utc::now();
        let mut hits: Vec<LongTermHit> = candidates
            .into_iter()
            .filter_map(|hit| {
                let mut entry = hit.entry;
                let decay = calculate_decay(
                    entry.timestamp,
                    entry.metadata.last_accessed,
                    self.config.half_life_days,
                    now,
                );
                if decay < DECAY_FLOOR && !include_decayed {
                    return None;
                }
                let surprise = entry.metadata.surprise_score.unwrap_or(1.0);
                entry.metadata.current_decay = Some(decay);
                Some(LongTermHit {
                    entry,
                    effective_score: surprise * decay,
                    decay,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.effective_score
                .partial_cmp(&a.effective_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Mark entries as accessed, refreshing their decay anchor.
    pub async fn touch(&self, ids: &[String]) {
        let now = Utc::now();
        for id in ids {
            let Some(mut entry) = self.get(id).await else {
                continue;
            };
            entry.metadata.last_accessed = Some(now);
            if let Err(e) = self.store.insert(&entry).await {
                warn!(memory_id = %id, "access refresh failed: {e}");
            }
            self.cache_insert(&entry);
        }
    }

    /// Delete entries whose decay dropped below `threshold`.
    ///
    /// Scans the most recent [`PRUNE_SCAN_WINDOW`] entries; returns how
    /// many were removed.
    pub async fn prune_decayed(&self, threshold: f64) -> usize {
        let recent = self
            .store
            .get_recent(PRUNE_SCAN_WINDOW)
            .await
            .unwrap_or_default();
        let now = Utc::now();
        let mut removed = 0;
        for entry in recent {
            let decay = calculate_decay(
                entry.timestamp,
                entry.metadata.last_accessed,
                self.config.half_life_days,
                now,
            );
            if decay < threshold {
                if self.store.delete(&entry.id).await.unwrap_or(false) {
                    removed += 1;
                }
                if let Ok(mut cache) = self.cache.write() {
                    cache.remove(&entry.id);
                }
            }
        }
        removed
    }

    /// Fetch by id: session cache first, then the backend.
    pub async fn get(&self, id: &str) -> Option<MemoryEntry> {
        if let Ok(cache) = self.cache.read() {
            if let Some(entry) = cache.get(id) {
                return Some(entry.clone());
            }
        }
        self.store.get(id).await.ok().flatten()
    }

    /// Delete by id from both the backend and the cache.
    pub async fn delete(&self, id: &str) -> bool {
        let cached = self
            .cache
            .write()
            .map(|mut cache| cache.remove(id).is_some())
            .unwrap_or(false);
        let stored = self.store.delete(id).await.unwrap_or(false);
        cached || stored
    }

    /// Update an existing entry in place (feedback metadata refresh).
    pub async fn update(&self, entry: &MemoryEntry) {
        if let Err(e) = self.store.insert(entry).await {
            warn!(memory_id = %entry.id, "long-term update failed: {e}");
        }
        self.cache_insert(entry);
    }

    /// Backend entry count.
    pub async fn count(&self) -> usize {
        self.store.count().await.unwrap_or_else(|_| {
            self.cache.read().map(|c| c.len()).unwrap_or(0)
        })
    }

    /// Every entry the layer can currently see, for export.
    pub async fn export_all(&self) -> Vec<MemoryEntry> {
        let mut entries = self
            .store
            .get_recent(usize::MAX)
            .await
            .unwrap_or_default();
        if entries.is_empty() {
            if let Ok(cache) = self.cache.read() {
                entries = cache.values().cloned().collect();
            }
        }
        entries
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLayer;
    use crate::vector::{InMemoryVectorStore, PseudoEmbedder};

    fn layer() -> LongTermLayer {
        let store = Arc::new(InMemoryVectorStore::new(
            "test_long_term",
            Arc::new(PseudoEmbedder::new(128)),
        ));
        LongTermLayer::new(store, LongTermConfig::default())
    }

    fn entry(content: &str) -> MemoryEntry {
        MemoryEntry::new(content, MemoryLayer::LongTerm)
    }

    #[tokio::test]
    async fn test_first_write_stores() {
        let layer = layer();
        let outcome = layer
            .store(entry("Database connection string: postgres://localhost:5432/mydb"))
            .await;
        assert!(outcome.stored);
        assert!(!outcome.entry.is_ghost());
        assert_eq!(layer.count().await, 1);
    }

    #[tokio::test]
    async fn test_repeated_write_ghosts() {
        let layer = layer();
        let text = "Database connection string: postgres://localhost:5432/mydb";

        let first = layer.store(entry(text)).await;
        assert!(first.stored);

        for _ in 0..9 {
            let outcome = layer.store(entry(text)).await;
            assert!(!outcome.stored);
            assert!(outcome.entry.is_ghost());
            assert!(outcome.entry.id.starts_with("ghost_"));
        }
        assert_eq!(layer.count().await, 1);
    }

    #[tokio::test]
    async fn test_filtering_disabled_stores_duplicates() {
        let store = Arc::new(InMemoryVectorStore::new(
            "test_long_term",
            Arc::new(PseudoEmbedder::new(128)),
        ));
        let layer = LongTermLayer::new(
            store,
            LongTermConfig {
                filtering_enabled: false,
                ..Default::default()
            },
        );
        let text = "same thing again";
        assert!(layer.store(entry(text)).await.stored);
        assert!(layer.store(entry(text)).await.stored);
        assert_eq!(layer.count().await, 2);
    }

    #[tokio::test]
    async fn test_query_annotates_decay() {
        let layer = layer();
        layer
            .store(entry("the retry budget is three attempts"))
            .await;
        let hits = layer.query("retry budget", 5, false).await;
        assert!(!hits.is_empty());
        let hit = &hits[0];
        assert!(hit.decay > 0.99);
        assert!(hit.entry.metadata.current_decay.unwrap() > 0.99);
        assert!(hit.effective_score > 0.0);
    }

    #[tokio::test]
    async fn test_store_annotations() {
        let layer = layer();
        let outcome = layer.store(entry("a novel observation about caching")).await;
        let meta = &outcome.entry.metadata;
        assert!(meta.surprise_score.is_some());
        assert!(meta.momentum.is_some());
        assert_eq!(meta.current_decay, Some(1.0));
        assert!(meta.last_accessed.is_some());
    }

    #[tokio::test]
    async fn test_prune_keeps_fresh_entries() {
        let layer = layer();
        layer.store(entry("fresh enough to keep")).await;
        let removed = layer.prune_decayed(0.1).await;
        assert_eq!(removed, 0);
        assert_eq!(layer.count().await, 1);
    }
}
