//! Recall Fusion & Highlighting
//!
//! Merges per-layer ranked lists into one result via Reciprocal Rank
//! Fusion (default) or arctan-normalized weighted summing, applies
//! utility reweighting, and optionally runs the answer-highlighting
//! stage over the fused candidates.

mod highlight;

pub use highlight::{
    DEFAULT_HIGHLIGHT_THRESHOLD, Highlighter, lexical_overlap, split_sentences,
};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::memory::{MemoryEntry, MemoryLayer, ScoredMemory};

// ============================================================================
// STRATEGY
// ============================================================================

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// How per-layer lists are merged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "strategy")]
pub enum FusionStrategy {
    /// `score(d) = Σ 1/(k + rank)` across all lists
    Rrf {
        /// Smoothing constant; higher flattens rank differences
        k: f64,
    },
    /// Arctan-normalize per-list scores to [0, 1], then weighted sum
    Weighted,
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::Rrf { k: DEFAULT_RRF_K }
    }
}

// ============================================================================
// INPUT
// ============================================================================

/// One layer's ranked candidates, best first.
#[derive(Debug, Clone)]
pub struct LayerResults {
    /// Layer (or virtual origin) that produced the list
    pub layer: MemoryLayer,
    /// Fusion weight under [`FusionStrategy::Weighted`]
    pub weight: f64,
    /// Candidates with their per-layer scores, best first
    pub hits: Vec<(MemoryEntry, f64)>,
}

// ============================================================================
// FUSION
// ============================================================================

struct Accumulator {
    entry: MemoryEntry,
    origin: MemoryLayer,
    fused: f64,
    best_rank: usize,
    best_layer_score: f64,
}

/// Fuse per-layer lists into a single ranked result.
///
/// Duplicates (same id across lists) collapse into one candidate keeping
/// the instance from its best-ranked list; scores accumulate across
/// lists. After fusion each score is multiplied by the utility weight
/// `0.7 + 0.6 × utility`. Ties break on higher importance, newer
/// timestamp, then smaller id. Empty per-layer lists are ignored.
pub fn fuse(lists: &[LayerResults], strategy: FusionStrategy, limit: usize) -> Vec<ScoredMemory> {
    let mut accumulators: HashMap<String, Accumulator> = HashMap::new();

    for list in lists {
        if list.hits.is_empty() {
            continue;
        }
        for (rank0, (entry, layer_score)) in list.hits.iter().enumerate() {
            let rank = rank0 + 1;
            let contribution = match strategy {
                FusionStrategy::Rrf { k } => 1.0 / (k + rank as f64),
                FusionStrategy::Weighted => arctan_normalize(*layer_score) * list.weight,
            };
            // Notebook lines keep their virtual origin through fusion.
            let origin = if entry.layer == MemoryLayer::Curated {
                MemoryLayer::Curated
            } else {
                list.layer
            };

            match accumulators.get_mut(&entry.id) {
                Some(acc) => {
                    acc.fused += contribution;
                    if rank < acc.best_rank
                        || (rank == acc.best_rank && *layer_score > acc.best_layer_score)
                    {
                        acc.entry = entry.clone();
                        acc.origin = origin;
                        acc.best_rank = rank;
                        acc.best_layer_score = *layer_score;
                    }
                }
                None => {
                    accumulators.insert(
                        entry.id.clone(),
                        Accumulator {
                            entry: entry.clone(),
                            origin,
                            fused: contribution,
                            best_rank: rank,
                            best_layer_score: *layer_score,
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<ScoredMemory> = accumulators
        .into_values()
        .map(|acc| {
            let utility = acc.entry.metadata.utility();
            ScoredMemory {
                score: acc.fused * utility_weight(utility),
                layer_score: Some(acc.best_layer_score),
                origin: acc.origin,
                entry: acc.entry,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let imp_a = a.entry.metadata.importance.unwrap_or(0.0);
                let imp_b = b.entry.metadata.importance.unwrap_or(0.0);
                imp_b
                    .partial_cmp(&imp_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    fused.truncate(limit);
    fused
}

/// Utility-based retrieval weight: `0.7 + 0.6 × utility` (0.7× to 1.3×).
pub fn utility_weight(utility: f64) -> f64 {
    0.7 + 0.6 * utility.clamp(0.0, 1.0)
}

/// Map an unbounded non-negative score into [0, 1) via arctan.
fn arctan_normalize(score: f64) -> f64 {
    score.max(0.0).atan() / std::f64::consts::FRAC_PI_2
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(id: &str, layer: MemoryLayer) -> MemoryEntry {
        let mut e = MemoryEntry::new(format!("content for {id}"), layer);
        e.id = id.to_string();
        e
    }

    fn list(layer: MemoryLayer, weight: f64, ids: &[&str]) -> LayerResults {
        LayerResults {
            layer,
            weight,
            hits: ids
                .iter()
                .enumerate()
                .map(|(i, id)| (entry(id, layer), 1.0 - i as f64 * 0.1))
                .collect(),
        }
    }

    #[test]
    fn test_rrf_rewards_cross_list_presence() {
        let lists = vec![
            list(MemoryLayer::LongTerm, 1.0, &["a", "b", "c"]),
            list(MemoryLayer::Semantic, 0.8, &["b", "a", "d"]),
        ];
        let fused = fuse(&lists, FusionStrategy::default(), 10);

        // a and b appear in both lists, so they outrank c and d
        let pos = |id: &str| fused.iter().position(|m| m.entry.id == id).unwrap();
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        // exact RRF value for a: 1/(60+1) + 1/(60+2)
        let a = fused.iter().find(|m| m.entry.id == "a").unwrap();
        let expected = (1.0 / 61.0 + 1.0 / 62.0) * utility_weight(0.5);
        assert!((a.score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_duplicates_collapse_to_best_rank() {
        let lists = vec![
            list(MemoryLayer::LongTerm, 1.0, &["x", "a"]),
            list(MemoryLayer::Episodic, 1.0, &["a", "y"]),
        ];
        let fused = fuse(&lists, FusionStrategy::default(), 10);
        let a: Vec<_> = fused.iter().filter(|m| m.entry.id == "a").collect();
        assert_eq!(a.len(), 1);
        // Best rank for "a" is rank 1 in the episodic list
        assert_eq!(a[0].origin, MemoryLayer::Episodic);
    }

    #[test]
    fn test_utility_reweighting() {
        let mut helpful = entry("helpful", MemoryLayer::LongTerm);
        helpful.metadata.helpful_count = 10;
        let mut harmful = entry("harmful", MemoryLayer::LongTerm);
        harmful.metadata.harmful_count = 10;

        let lists = vec![LayerResults {
            layer: MemoryLayer::LongTerm,
            weight: 1.0,
            hits: vec![(harmful, 1.0), (helpful, 0.9)],
        }];
        let fused = fuse(&lists, FusionStrategy::default(), 10);
        // Utility 1.0 (x1.3) beats utility 0.0 (x0.7) despite the worse rank
        assert_eq!(fused[0].entry.id, "helpful");
    }

    #[test]
    fn test_tie_breaks() {
        let now = Utc::now();
        let mut older = entry("b-older", MemoryLayer::LongTerm);
        older.timestamp = now - Duration::hours(2);
        let mut newer = entry("a-newer", MemoryLayer::LongTerm);
        newer.timestamp = now;

        // Same rank in two separate lists → identical fused score
        let lists = vec![
            LayerResults {
                layer: MemoryLayer::LongTerm,
                weight: 1.0,
                hits: vec![(older, 1.0)],
            },
            LayerResults {
                layer: MemoryLayer::Semantic,
                weight: 1.0,
                hits: vec![(newer, 1.0)],
            },
        ];
        let fused = fuse(&lists, FusionStrategy::default(), 10);
        assert_eq!(fused[0].entry.id, "a-newer");
    }

    #[test]
    fn test_weighted_strategy_uses_weights() {
        let lists = vec![
            list(MemoryLayer::LongTerm, 1.0, &["strong"]),
            list(MemoryLayer::Episodic, 0.1, &["weak"]),
        ];
        let fused = fuse(&lists, FusionStrategy::Weighted, 10);
        assert_eq!(fused[0].entry.id, "strong");
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn test_empty_lists_are_ignored() {
        let lists = vec![
            LayerResults {
                layer: MemoryLayer::Factual,
                weight: 1.0,
                hits: vec![],
            },
            list(MemoryLayer::LongTerm, 1.0, &["only"]),
        ];
        let fused = fuse(&lists, FusionStrategy::default(), 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].entry.id, "only");
    }

    #[test]
    fn test_limit_truncates() {
        let lists = vec![list(MemoryLayer::LongTerm, 1.0, &["a", "b", "c", "d"])];
        let fused = fuse(&lists, FusionStrategy::default(), 2);
        assert_eq!(fused.len(), 2);
    }
}
