//! Vector Store Adapter
//!
//! The pluggable dense-retrieval seam. The engine only ever talks to the
//! [`VectorStore`] and [`EmbeddingGenerator`] traits; the bundled
//! implementations keep it fully functional offline:
//!
//! - [`PseudoEmbedder`]: deterministic hash-projection embeddings
//! - [`InMemoryVectorStore`]: cosine + BM25 hybrid over a process-local map
//! - [`RemoteVectorStore`]: REST client for an external vector database
//! - [`FailSoftStore`]: swallows backend failures (reads go empty, writes
//!   land in a local cache) so the engine never surfaces transient store
//!   errors

mod embedding;
mod fail_soft;
mod memory_store;
mod remote;

pub use embedding::{EmbeddingGenerator, PseudoEmbedder};
pub use fail_soft::FailSoftStore;
pub use memory_store::InMemoryVectorStore;
pub use remote::RemoteVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::MemoryEntry;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector store error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorError {
    /// The store was used before `initialize`
    #[error("Vector store not initialized")]
    NotInitialized,
    /// The backend could not be reached
    #[error("Vector store connection failed: {0}")]
    ConnectionFailed(String),
    /// A call exceeded its deadline
    #[error("Vector store call timed out")]
    Timeout,
    /// Backend-reported failure
    #[error("Vector store backend error: {0}")]
    Backend(String),
    /// Caller-supplied input was unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Vector store result type
pub type VectorResult<T> = std::result::Result<T, VectorError>;

// ============================================================================
// SEARCH OPTIONS
// ============================================================================

/// How hybrid results from the dense and sparse sides are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankStrategy {
    /// Reciprocal rank fusion (rank-based, scale-free)
    #[default]
    Rrf,
    /// Weighted sum of max-normalized scores
    Weighted,
}

/// Options for [`VectorStore::hybrid_search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchOpts {
    /// Fusion strategy for the dense and sparse result lists
    pub rerank: RerankStrategy,
    /// RRF smoothing constant
    pub rrf_k: f64,
    /// Weight of the dense (embedding) side under `Weighted`
    pub dense_weight: f64,
    /// Weight of the sparse (BM25) side under `Weighted`
    pub sparse_weight: f64,
    /// Optional boolean filter expression, backend-interpreted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// BM25 term-frequency saturation
    pub bm25_k1: f64,
    /// BM25 length normalization
    pub bm25_b: f64,
}

impl Default for VectorSearchOpts {
    fn default() -> Self {
        Self {
            rerank: RerankStrategy::Rrf,
            rrf_k: 60.0,
            dense_weight: 0.7,
            sparse_weight: 0.3,
            filter: None,
            bm25_k1: 1.2,
            bm25_b: 0.75,
        }
    }
}

// ============================================================================
// HITS
// ============================================================================

/// A scored entry returned from a vector-store search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorHit {
    /// The matched entry
    pub entry: MemoryEntry,
    /// Backend similarity / fusion score, higher is better
    pub score: f64,
}

// ============================================================================
// STORE CAPABILITY SET
// ============================================================================

/// The capability set every vector backend implements.
///
/// Each layer gets its own collection; the collection name and embedding
/// geometry are fixed at construction time.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare the backing collection. Idempotent.
    async fn initialize(&self) -> VectorResult<()>;

    /// Insert or replace an entry.
    async fn insert(&self, entry: &MemoryEntry) -> VectorResult<()>;

    /// Dense similarity search.
    async fn search(&self, query: &str, k: usize) -> VectorResult<Vec<VectorHit>>;

    /// Hybrid dense + sparse search. Backends without a sparse side may
    /// fall back to dense-only.
    async fn hybrid_search(
        &self,
        query: &str,
        k: usize,
        opts: &VectorSearchOpts,
    ) -> VectorResult<Vec<VectorHit>> {
        let _ = opts;
        self.search(query, k).await
    }

    /// Fetch one entry by id.
    async fn get(&self, id: &str) -> VectorResult<Option<MemoryEntry>>;

    /// The `k` most recently inserted entries, newest first.
    async fn get_recent(&self, k: usize) -> VectorResult<Vec<MemoryEntry>>;

    /// Delete by id; returns whether anything was removed.
    async fn delete(&self, id: &str) -> VectorResult<bool>;

    /// Number of stored entries.
    async fn count(&self) -> VectorResult<usize>;

    /// Release backend resources.
    async fn close(&self) -> VectorResult<()>;
}
