//! Process-local vector store.
//!
//! The offline-mode backend: cosine similarity over injected embeddings
//! for the dense side, BM25 over token frequencies for the sparse side,
//! fused with RRF or weighted-sum reranking. Also serves as the reference
//! implementation for external backends.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{
    EmbeddingGenerator, RerankStrategy, VectorError, VectorHit, VectorResult, VectorSearchOpts,
    VectorStore,
};
use crate::hashing::{cosine_similarity, tokenize};
use crate::memory::MemoryEntry;

// ============================================================================
// STATE
// ============================================================================

struct Record {
    entry: MemoryEntry,
    vector: Vec<f32>,
    tokens: Vec<String>,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<String, Record>,
    /// Insertion order, oldest first; re-inserts move the id to the back.
    order: Vec<String>,
}

/// In-memory vector store over an injected embedder.
pub struct InMemoryVectorStore {
    collection: String,
    embedder: Arc<dyn EmbeddingGenerator>,
    state: RwLock<StoreState>,
}

impl InMemoryVectorStore {
    /// A store for `collection` backed by `embedder`.
    pub fn new(collection: impl Into<String>, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            collection: collection.into(),
            embedder,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Collection name this store serves.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn lock_read(&self) -> VectorResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| VectorError::Backend(format!("lock poisoned: {e}")))
    }

    fn lock_write(&self) -> VectorResult<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| VectorError::Backend(format!("lock poisoned: {e}")))
    }

    /// Evaluate the simple conjunctive filter grammar the local backend
    /// understands: space-separated `tag:<t>` and `project:<id>` terms.
    fn matches_filter(entry: &MemoryEntry, filter: &str) -> bool {
        for term in filter.split_whitespace() {
            if let Some(tag) = term.strip_prefix("tag:") {
                if !entry.metadata.tags.iter().any(|t| t == tag) {
                    return false;
                }
            } else if let Some(project) = term.strip_prefix("project:") {
                if entry.metadata.project_id.as_deref() != Some(project) {
                    return false;
                }
            }
        }
        true
    }

    /// Dense side: cosine against every stored vector.
    fn dense_scores(
        state: &StoreState,
        query_vector: &[f32],
        filter: Option<&str>,
    ) -> Vec<(String, f64)> {
        let mut scored: Vec<(String, f64)> = state
            .records
            .values()
            .filter(|r| filter.is_none_or(|f| Self::matches_filter(&r.entry, f)))
            .map(|r| (r.entry.id.clone(), cosine_similarity(query_vector, &r.vector)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Sparse side: BM25 over token frequencies.
    fn sparse_scores(
        state: &StoreState,
        query_tokens: &[String],
        k1: f64,
        b: f64,
        filter: Option<&str>,
    ) -> Vec<(String, f64)> {
        let candidates: Vec<&Record> = state
            .records
            .values()
            .filter(|r| filter.is_none_or(|f| Self::matches_filter(&r.entry, f)))
            .collect();
        let n = candidates.len();
        if n == 0 || query_tokens.is_empty() {
            return Vec::new();
        }

        let avg_len: f64 =
            candidates.iter().map(|r| r.tokens.len() as f64).sum::<f64>() / n as f64;
        let avg_len = avg_len.max(1.0);

        // Document frequency per query term
        let unique_terms: HashSet<&String> = query_tokens.iter().collect();
        let mut df: HashMap<&String, usize> = HashMap::new();
        for term in &unique_terms {
            let count = candidates
                .iter()
                .filter(|r| r.tokens.iter().any(|t| t == *term))
                .count();
            df.insert(term, count);
        }

        let mut scored: Vec<(String, f64)> = Vec::new();
        for record in candidates {
            let doc_len = record.tokens.len() as f64;
            let mut score = 0.0;
            for term in &unique_terms {
                let doc_freq = df[*term];
                if doc_freq == 0 {
                    continue;
                }
                let tf = record.tokens.iter().filter(|t| *t == *term).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let idf = (((n as f64 - doc_freq as f64 + 0.5) / (doc_freq as f64 + 0.5)) + 1.0)
                    .ln();
                let norm = tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * doc_len / avg_len));
                score += idf * norm;
            }
            if score > 0.0 {
                scored.push((record.entry.id.clone(), score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// RRF over the two ranked lists: `score(d) = Σ 1/(k + rank)`.
    fn fuse_rrf(dense: &[(String, f64)], sparse: &[(String, f64)], k: f64) -> Vec<(String, f64)> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        for (rank, (id, _)) in dense.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += 1.0 / (k + (rank + 1) as f64);
        }
        for (rank, (id, _)) in sparse.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += 1.0 / (k + (rank + 1) as f64);
        }
        let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fused
    }

    /// Weighted sum of max-normalized scores.
    fn fuse_weighted(
        dense: &[(String, f64)],
        sparse: &[(String, f64)],
        dense_weight: f64,
        sparse_weight: f64,
    ) -> Vec<(String, f64)> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        let max_dense = dense.first().map(|(_, s)| *s).unwrap_or(1.0).max(1e-3);
        for (id, score) in dense {
            *scores.entry(id.clone()).or_default() += score / max_dense * dense_weight;
        }
        let max_sparse = sparse.first().map(|(_, s)| *s).unwrap_or(1.0).max(1e-3);
        for (id, score) in sparse {
            *scores.entry(id.clone()).or_default() += score / max_sparse * sparse_weight;
        }
        let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fused
    }

    fn hits_from_ids(state: &StoreState, ranked: Vec<(String, f64)>, k: usize) -> Vec<VectorHit> {
        ranked
            .into_iter()
            .filter_map(|(id, score)| {
                state.records.get(&id).map(|r| VectorHit {
                    entry: r.entry.clone(),
                    score,
                })
            })
            .take(k)
            .collect()
    }
}

// ============================================================================
// TRAIT IMPL
// ============================================================================

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> VectorResult<()> {
        Ok(())
    }

    async fn insert(&self, entry: &MemoryEntry) -> VectorResult<()> {
        let vector = self.embedder.embed(&entry.content).await?;
        let tokens = tokenize(&entry.content);
        let mut state = self.lock_write()?;
        state.order.retain(|id| id != &entry.id);
        state.order.push(entry.id.clone());
        state.records.insert(
            entry.id.clone(),
            Record {
                entry: entry.clone(),
                vector,
                tokens,
            },
        );
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> VectorResult<Vec<VectorHit>> {
        let query_vector = self.embedder.embed(query).await?;
        let state = self.lock_read()?;
        let dense = Self::dense_scores(&state, &query_vector, None);
        Ok(Self::hits_from_ids(&state, dense, k))
    }

    async fn hybrid_search(
        &self,
        query: &str,
        k: usize,
        opts: &VectorSearchOpts,
    ) -> VectorResult<Vec<VectorHit>> {
        let query_vector = self.embedder.embed(query).await?;
        let query_tokens = tokenize(query);
        let state = self.lock_read()?;
        let filter = opts.filter.as_deref();

        let dense = Self::dense_scores(&state, &query_vector, filter);
        let sparse =
            Self::sparse_scores(&state, &query_tokens, opts.bm25_k1, opts.bm25_b, filter);

        let fused = match opts.rerank {
            RerankStrategy::Rrf => Self::fuse_rrf(&dense, &sparse, opts.rrf_k),
            RerankStrategy::Weighted => {
                Self::fuse_weighted(&dense, &sparse, opts.dense_weight, opts.sparse_weight)
            }
        };
        Ok(Self::hits_from_ids(&state, fused, k))
    }

    async fn get(&self, id: &str) -> VectorResult<Option<MemoryEntry>> {
        let state = self.lock_read()?;
        Ok(state.records.get(id).map(|r| r.entry.clone()))
    }

    async fn get_recent(&self, k: usize) -> VectorResult<Vec<MemoryEntry>> {
        let state = self.lock_read()?;
        Ok(state
            .order
            .iter()
            .rev()
            .take(k)
            .filter_map(|id| state.records.get(id).map(|r| r.entry.clone()))
            .collect())
    }

    async fn delete(&self, id: &str) -> VectorResult<bool> {
        let mut state = self.lock_write()?;
        state.order.retain(|existing| existing != id);
        Ok(state.records.remove(id).is_some())
    }

    async fn count(&self) -> VectorResult<usize> {
        Ok(self.lock_read()?.records.len())
    }

    async fn close(&self) -> VectorResult<()> {
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLayer;
    use crate::vector::PseudoEmbedder;

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new("test_long_term", Arc::new(PseudoEmbedder::new(128)))
    }

    fn entry(content: &str) -> MemoryEntry {
        MemoryEntry::new(content, MemoryLayer::LongTerm)
    }

    #[tokio::test]
    async fn test_insert_search_roundtrip() {
        let store = store();
        let target = entry("The API key is sk-test-12345");
        store.insert(&target).await.unwrap();
        store.insert(&entry("Lunch was a sandwich")).await.unwrap();

        let hits = store.search("what is the api key", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].entry.id, target.id);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hybrid_search_rrf() {
        let store = store();
        let target = entry("deployment failed with a connection timeout");
        store.insert(&target).await.unwrap();
        store.insert(&entry("weekly planning notes")).await.unwrap();

        let hits = store
            .hybrid_search(
                "connection timeout",
                5,
                &VectorSearchOpts::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].entry.id, target.id);
    }

    #[tokio::test]
    async fn test_filter_terms() {
        let store = store();
        let mut tagged = entry("tagged entry about deploys");
        tagged.metadata.tags = vec!["deploy".to_string()];
        store.insert(&tagged).await.unwrap();
        store.insert(&entry("untagged entry about deploys")).await.unwrap();

        let opts = VectorSearchOpts {
            filter: Some("tag:deploy".to_string()),
            ..Default::default()
        };
        let hits = store.hybrid_search("deploys", 5, &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, tagged.id);
    }

    #[tokio::test]
    async fn test_get_recent_is_newest_first() {
        let store = store();
        let first = entry("first");
        let second = entry("second");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let recent = store.get_recent(10).await.unwrap();
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let target = entry("to be removed");
        store.insert(&target).await.unwrap();
        assert!(store.delete(&target.id).await.unwrap());
        assert!(!store.delete(&target.id).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
