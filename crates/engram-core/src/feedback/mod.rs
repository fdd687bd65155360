//! Feedback & Utility
//!
//! Per-memory helpful/harmful counters driving utility-weighted ranking.
//! Feedback is idempotent per `(session, memory, signal)`; utility is
//! `helpful / (helpful + harmful)` with 0.5 for unrated memories, and the
//! prune rule drops memories that have been rated and sit below the
//! utility threshold.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::MemoryMetadata;

// ============================================================================
// TYPES
// ============================================================================

/// Default utility threshold below which rated memories are prunable.
pub const DEFAULT_UTILITY_PRUNE_THRESHOLD: f64 = 0.4;

/// A feedback signal against one memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSignal {
    /// The memory led to a good outcome
    Helpful,
    /// The memory led to a bad outcome
    Harmful,
}

impl FeedbackSignal {
    /// String name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSignal::Helpful => "helpful",
            FeedbackSignal::Harmful => "harmful",
        }
    }
}

impl std::fmt::Display for FeedbackSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of recording feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    /// False when the same (session, memory, signal) was already recorded
    pub applied: bool,
    /// Helpful count after the call
    pub helpful_count: u32,
    /// Harmful count after the call
    pub harmful_count: u32,
    /// Utility score after the call
    pub utility_score: f64,
}

// ============================================================================
// TRACKER
// ============================================================================

/// Tracks feedback idempotence and mutates memory metadata.
#[derive(Default)]
pub struct FeedbackTracker {
    /// `(session, memory, signal)` triples already applied
    seen: Mutex<HashSet<(String, String, FeedbackSignal)>>,
}

impl FeedbackTracker {
    /// A fresh tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a feedback signal to `metadata`.
    ///
    /// Repeat calls with the same `(session_id, memory_id, signal)` are
    /// no-ops; calls without a session id dedupe under a shared anonymous
    /// session.
    pub fn record(
        &self,
        metadata: &mut MemoryMetadata,
        memory_id: &str,
        signal: FeedbackSignal,
        session_id: Option<&str>,
    ) -> FeedbackOutcome {
        let key = (
            session_id.unwrap_or("").to_string(),
            memory_id.to_string(),
            signal,
        );
        let fresh = match self.seen.lock() {
            Ok(mut seen) => seen.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };

        if fresh {
            let now = Utc::now();
            match signal {
                FeedbackSignal::Helpful => {
                    metadata.helpful_count += 1;
                    metadata.last_helpful = Some(now);
                }
                FeedbackSignal::Harmful => {
                    metadata.harmful_count += 1;
                    metadata.last_harmful = Some(now);
                }
            }
            metadata.utility_score = Some(metadata.utility());
            debug!(memory_id, signal = %signal, "feedback recorded");
        }

        FeedbackOutcome {
            applied: fresh,
            helpful_count: metadata.helpful_count,
            harmful_count: metadata.harmful_count,
            utility_score: metadata.utility(),
        }
    }
}

/// Prune rule: rated at least once and utility below `threshold`.
pub fn should_prune(metadata: &MemoryMetadata, threshold: f64) -> bool {
    let total = metadata.helpful_count + metadata.harmful_count;
    total > 0 && metadata.utility() < threshold
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_counters_and_utility() {
        let tracker = FeedbackTracker::new();
        let mut meta = MemoryMetadata::default();

        let outcome = tracker.record(&mut meta, "m1", FeedbackSignal::Helpful, Some("s1"));
        assert!(outcome.applied);
        assert_eq!(meta.helpful_count, 1);
        assert!((outcome.utility_score - 1.0).abs() < 1e-9);
        assert!(meta.last_helpful.is_some());

        tracker.record(&mut meta, "m1", FeedbackSignal::Harmful, Some("s2"));
        assert!((meta.utility() - 0.5).abs() < 1e-9);
        assert_eq!(meta.utility_score, Some(0.5));
    }

    #[test]
    fn test_idempotence_per_session() {
        let tracker = FeedbackTracker::new();
        let mut meta = MemoryMetadata::default();

        assert!(
            tracker
                .record(&mut meta, "m1", FeedbackSignal::Helpful, Some("s1"))
                .applied
        );
        // Same triple: no-op
        assert!(
            !tracker
                .record(&mut meta, "m1", FeedbackSignal::Helpful, Some("s1"))
                .applied
        );
        assert_eq!(meta.helpful_count, 1);

        // Different session: counts again
        assert!(
            tracker
                .record(&mut meta, "m1", FeedbackSignal::Helpful, Some("s2"))
                .applied
        );
        assert_eq!(meta.helpful_count, 2);
    }

    #[test]
    fn test_utility_invariant() {
        // |utility − h/(h+k)| < 1e-9 for any counts
        for (h, k) in [(1u32, 0u32), (3, 1), (0, 5), (7, 7)] {
            let meta = MemoryMetadata {
                helpful_count: h,
                harmful_count: k,
                ..Default::default()
            };
            let expected = f64::from(h) / f64::from(h + k);
            assert!((meta.utility() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_should_prune() {
        let unrated = MemoryMetadata::default();
        assert!(!should_prune(&unrated, DEFAULT_UTILITY_PRUNE_THRESHOLD));

        let bad = MemoryMetadata {
            helpful_count: 1,
            harmful_count: 4,
            ..Default::default()
        };
        assert!(should_prune(&bad, DEFAULT_UTILITY_PRUNE_THRESHOLD));

        let good = MemoryMetadata {
            helpful_count: 4,
            harmful_count: 1,
            ..Default::default()
        };
        assert!(!should_prune(&good, DEFAULT_UTILITY_PRUNE_THRESHOLD));
    }
}
