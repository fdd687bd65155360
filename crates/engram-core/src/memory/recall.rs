//! Recall input and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MemoryEntry, MemoryLayer};

// ============================================================================
// RECALL INPUT
// ============================================================================

/// Input for recalling memories.
///
/// Uses `deny_unknown_fields` to prevent field injection from untrusted
/// callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecallInput {
    /// Search query
    pub query: String,
    /// Maximum results to return
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Include entries whose decay dropped below the floor
    #[serde(default)]
    pub include_decayed: bool,
    /// Restrict to a project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Restrict to entries carrying any of these tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Only consider entries at or after this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
    /// Only consider entries at or before this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    /// Run the answer-highlighting stage on the fused results
    #[serde(default)]
    pub highlight: bool,
    /// Session id recorded against access metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_limit() -> usize {
    10
}

impl RecallInput {
    /// A plain query with the default limit.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            include_decayed: false,
            project_id: None,
            tags: Vec::new(),
            after: None,
            before: None,
            highlight: false,
            session_id: None,
        }
    }

    /// Builder-style limit override.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

// ============================================================================
// RECALL RESULTS
// ============================================================================

/// A fused candidate with its final score and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    /// The matched entry
    pub entry: MemoryEntry,
    /// Final fused score (RRF or weighted, after utility reweighting)
    pub score: f64,
    /// Layer (or virtual origin) the candidate came from
    pub origin: MemoryLayer,
    /// Per-layer score before fusion, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_score: Option<f64>,
}

/// A sentence selected by the answer-highlighting stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightedSentence {
    /// The sentence text
    pub sentence: String,
    /// Relevance score against the query (0.0 to 1.0)
    pub score: f64,
    /// Id of the memory the sentence came from
    pub memory_id: String,
}

/// Result of a recall: fused candidates plus the optional highlight stage.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    /// Fused, ranked candidates
    pub fused_memories: Vec<ScoredMemory>,
    /// Sentences above the highlight threshold, when highlighting ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlighted_sentences: Option<Vec<HighlightedSentence>>,
    /// Highlighted chars / candidate chars, when highlighting ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_rate: Option<f64>,
    /// Wall-clock time of the whole recall, recorded even when empty
    pub total_query_time_ms: u64,
}

impl RecallResult {
    /// An empty result that still records the elapsed time.
    pub fn empty(elapsed_ms: u64) -> Self {
        Self {
            fused_memories: Vec::new(),
            highlighted_sentences: None,
            compression_rate: None,
            total_query_time_ms: elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_input_defaults() {
        let input: RecallInput = serde_json::from_str(r#"{"query":"hello"}"#).unwrap();
        assert_eq!(input.limit, 10);
        assert!(!input.include_decayed);
        assert!(!input.highlight);
    }

    #[test]
    fn test_recall_input_rejects_unknown() {
        let json = r#"{"query":"hello","boost":99}"#;
        assert!(serde_json::from_str::<RecallInput>(json).is_err());
    }
}
