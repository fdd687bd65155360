//! Embedding generation seam.
//!
//! The engine injects an [`EmbeddingGenerator`]; production deployments
//! wire a real model behind it (the `embeddings` feature ships a local
//! fastembed implementation), while the deterministic [`PseudoEmbedder`]
//! keeps offline mode and tests fully functional with zero downloads.

use async_trait::async_trait;

use super::{VectorError, VectorResult};
use crate::hashing::{family_hash, tokenize};

// ============================================================================
// TRAIT
// ============================================================================

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Output dimensionality; constant for the generator's lifetime.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> VectorResult<Vec<f32>>;

    /// Embed a batch; the default embeds sequentially.
    async fn embed_batch(&self, texts: &[String]) -> VectorResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

// ============================================================================
// PSEUDO EMBEDDER
// ============================================================================

/// Deterministic hash-projection embeddings for offline mode.
///
/// Each token is hashed into a handful of dimensions with alternating
/// signs; the result is L2-normalized. Two texts sharing vocabulary land
/// near each other, which is all the offline recall path needs. The same
/// text always produces the same vector.
#[derive(Debug, Clone)]
pub struct PseudoEmbedder {
    dimensions: usize,
}

/// How many dimensions each token touches.
const PROJECTIONS_PER_TOKEN: usize = 4;

impl PseudoEmbedder {
    /// A pseudo-embedder with the given output dimensionality.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn token_seed(token: &str) -> i64 {
        let mut x: i64 = 0;
        for b in token.bytes() {
            x = x.wrapping_mul(131).wrapping_add(i64::from(b));
        }
        x
    }

    /// Synchronous embedding; the trait impl just wraps this.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let seed = Self::token_seed(&token);
            for p in 0..PROJECTIONS_PER_TOKEN {
                let dim = family_hash(seed, p + 1, p + 3, self.dimensions);
                let sign = if family_hash(seed, p + 5, p + 11, 2) == 0 {
                    1.0
                } else {
                    -1.0
                };
                vector[dim] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for PseudoEmbedder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingGenerator for PseudoEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> VectorResult<Vec<f32>> {
        if self.dimensions == 0 {
            return Err(VectorError::InvalidInput("zero dimensions".to_string()));
        }
        Ok(self.embed_sync(text))
    }
}

// ============================================================================
// LOCAL MODEL (feature-gated)
// ============================================================================

/// Local ONNX embeddings via fastembed.
#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub mod local {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::super::{VectorError, VectorResult};
    use super::EmbeddingGenerator;

    /// Embedding generator backed by a local fastembed model.
    pub struct LocalEmbedder {
        model: Mutex<TextEmbedding>,
        dimensions: usize,
    }

    impl LocalEmbedder {
        /// Initialize the default local model, downloading it on first use.
        pub fn new(dimensions: usize) -> VectorResult<Self> {
            let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| VectorError::Backend(format!("model init failed: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
                dimensions,
            })
        }
    }

    #[async_trait]
    impl EmbeddingGenerator for LocalEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, text: &str) -> VectorResult<Vec<f32>> {
            let mut model = self
                .model
                .lock()
                .map_err(|e| VectorError::Backend(format!("lock poisoned: {e}")))?;
            let mut vectors = model
                .embed(vec![text.to_string()], None)
                .map_err(|e| VectorError::Backend(format!("embedding failed: {e}")))?;
            let mut vector = vectors
                .pop()
                .ok_or_else(|| VectorError::Backend("empty embedding batch".to_string()))?;
            vector.truncate(self.dimensions);
            Ok(vector)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
