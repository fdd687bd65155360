//! Answer highlighting.
//!
//! Splits fused candidates into sentences and keeps the ones that score
//! above a threshold against the query. Scoring runs through a fallback
//! chain, in order:
//!
//! 1. the remote highlight sidecar (bounded RPC, debounced health check)
//! 2. embedding cosine similarity via the configured embedder
//! 3. lexical term overlap
//!
//! Any stage failing silently hands the whole batch to the next stage.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hashing::cosine_similarity;
use crate::memory::{HighlightedSentence, ScoredMemory};
use crate::vector::EmbeddingGenerator;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default sentence-relevance threshold.
pub const DEFAULT_HIGHLIGHT_THRESHOLD: f64 = 0.5;

/// Deadline for one sidecar highlight call.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a sidecar health check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a health verdict is trusted before re-checking.
const HEALTH_DEBOUNCE: Duration = Duration::from_secs(30);

/// Query-embedding cache size.
const QUERY_CACHE_SIZE: usize = 128;

// ============================================================================
// SIDECAR WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HighlightRequest<'a> {
    question: &'a str,
    context: &'a str,
    threshold: f64,
    return_sentence_metrics: bool,
}

#[derive(Debug, Deserialize)]
struct HighlightResponse {
    highlighted_sentences: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    compression_rate: f64,
    #[serde(default)]
    sentence_probabilities: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    model_loaded: bool,
}

// ============================================================================
// HIGHLIGHTER
// ============================================================================

struct HealthState {
    checked_at: Option<Instant>,
    healthy: bool,
}

/// The answer-highlighting stage.
pub struct Highlighter {
    client: reqwest::Client,
    service_url: Option<String>,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
    health: Mutex<HealthState>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Highlighter {
    /// A highlighter with an optional sidecar URL and optional embedder.
    ///
    /// With neither configured, scoring is purely lexical.
    pub fn new(
        service_url: Option<String>,
        embedder: Option<Arc<dyn EmbeddingGenerator>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            service_url,
            embedder,
            health: Mutex::new(HealthState {
                checked_at: None,
                healthy: false,
            }),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Highlight sentences from the fused candidates.
    ///
    /// Returns the kept sentences and the compression rate (highlighted
    /// chars over candidate chars).
    pub async fn highlight(
        &self,
        query: &str,
        candidates: &[ScoredMemory],
        threshold: f64,
    ) -> (Vec<HighlightedSentence>, f64) {
        let total_chars: usize = candidates
            .iter()
            .map(|c| c.entry.content.chars().count())
            .sum();
        if total_chars == 0 {
            return (Vec::new(), 0.0);
        }

        let mut highlighted = Vec::new();

        if let Some(remote) = self.try_remote(query, candidates, threshold).await {
            highlighted = remote;
        } else {
            for candidate in candidates {
                for sentence in split_sentences(&candidate.entry.content) {
                    let score = self.score_sentence(query, &sentence).await;
                    if score >= threshold {
                        highlighted.push(HighlightedSentence {
                            sentence,
                            score,
                            memory_id: candidate.entry.id.clone(),
                        });
                    }
                }
            }
        }

        highlighted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let kept_chars: usize = highlighted.iter().map(|h| h.sentence.chars().count()).sum();
        let compression = kept_chars as f64 / total_chars as f64;
        (highlighted, compression)
    }

    /// Score one sentence: embedding cosine when available, else lexical.
    async fn score_sentence(&self, query: &str, sentence: &str) -> f64 {
        if let Some(embedder) = &self.embedder {
            if let Some(score) = self.embedding_score(embedder, query, sentence).await {
                return score;
            }
        }
        lexical_overlap(query, sentence)
    }

    async fn embedding_score(
        &self,
        embedder: &Arc<dyn EmbeddingGenerator>,
        query: &str,
        sentence: &str,
    ) -> Option<f64> {
        let query_vec = self.cached_embedding(embedder, query).await?;
        let sentence_vec = embedder.embed(sentence).await.ok()?;
        Some(cosine_similarity(&query_vec, &sentence_vec).max(0.0))
    }

    async fn cached_embedding(
        &self,
        embedder: &Arc<dyn EmbeddingGenerator>,
        text: &str,
    ) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(text) {
                return Some(vector.clone());
            }
        }
        let vector = embedder.embed(text).await.ok()?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Some(vector)
    }

    // ------------------------------------------------------------------
    // Remote sidecar
    // ------------------------------------------------------------------

    /// Attempt the sidecar path; `None` hands the batch to the fallback.
    async fn try_remote(
        &self,
        query: &str,
        candidates: &[ScoredMemory],
        threshold: f64,
    ) -> Option<Vec<HighlightedSentence>> {
        let url = self.service_url.as_ref()?;
        if !self.sidecar_healthy(url).await {
            return None;
        }

        let mut highlighted = Vec::new();
        for candidate in candidates {
            let request = HighlightRequest {
                question: query,
                context: &candidate.entry.content,
                threshold,
                return_sentence_metrics: true,
            };
            let response = tokio::time::timeout(
                CALL_TIMEOUT,
                self.client
                    .post(format!("{}/highlight", url.trim_end_matches('/')))
                    .json(&request)
                    .send(),
            )
            .await;

            let body: HighlightResponse = match response {
                Ok(Ok(resp)) => match resp.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("highlight sidecar returned bad body: {e}");
                        return None;
                    }
                },
                Ok(Err(e)) => {
                    warn!("highlight sidecar call failed: {e}");
                    return None;
                }
                Err(_) => {
                    warn!("highlight sidecar call timed out");
                    return None;
                }
            };

            for (i, sentence) in body.highlighted_sentences.into_iter().enumerate() {
                let score = body
                    .sentence_probabilities
                    .get(i)
                    .copied()
                    .unwrap_or(threshold);
                highlighted.push(HighlightedSentence {
                    sentence,
                    score,
                    memory_id: candidate.entry.id.clone(),
                });
            }
        }
        Some(highlighted)
    }

    /// Debounced sidecar health check.
    async fn sidecar_healthy(&self, url: &str) -> bool {
        if let Ok(health) = self.health.lock() {
            if let Some(checked_at) = health.checked_at {
                if checked_at.elapsed() < HEALTH_DEBOUNCE {
                    return health.healthy;
                }
            }
        }

        let healthy = match tokio::time::timeout(
            HEALTH_TIMEOUT,
            self.client
                .get(format!("{}/health", url.trim_end_matches('/')))
                .send(),
        )
        .await
        {
            Ok(Ok(resp)) => match resp.json::<HealthResponse>().await {
                Ok(body) => body.status == "ok" && body.model_loaded,
                Err(_) => false,
            },
            _ => false,
        };
        debug!(healthy, "highlight sidecar health check");

        if let Ok(mut health) = self.health.lock() {
            health.checked_at = Some(Instant::now());
            health.healthy = healthy;
        }
        healthy
    }
}

// ============================================================================
// PURE HELPERS
// ============================================================================

/// Split content into sentences on terminal punctuation and newlines.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(|s| s.trim().trim_end_matches(['.', '!', '?']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lexical term overlap: fraction of the query's long tokens (length > 2)
/// present in the sentence.
pub fn lexical_overlap(query: &str, sentence: &str) -> f64 {
    let query_terms: Vec<String> = crate::hashing::tokenize(query)
        .into_iter()
        .filter(|t| t.len() > 2)
        .collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let sentence_terms: std::collections::HashSet<String> = crate::hashing::tokenize(sentence)
        .into_iter()
        .filter(|t| t.len() > 2)
        .collect();
    let shared = query_terms
        .iter()
        .filter(|t| sentence_terms.contains(*t))
        .count();
    shared as f64 / query_terms.len() as f64
}

// ============================================================================
// TESTS
// ============================================================================
