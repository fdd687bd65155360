//! Memory module - Core types and data structures
//!
//! Implements the layered memory model:
//! - Memory entries with layer assignment and metadata
//! - Surprise / momentum / decay annotations
//! - Recall inputs and fused results
//! - Engine events for coordination fan-out

mod entry;
mod event;
mod recall;

pub use entry::{AddInput, AddOutcome, MemoryEntry, MemoryMetadata, GHOST_ID_PREFIX};
pub use event::MemoryEvent;
pub use recall::{HighlightedSentence, RecallInput, RecallResult, ScoredMemory};

use serde::{Deserialize, Serialize};

// ============================================================================
// MEMORY LAYERS
// ============================================================================

/// The memory layer an entry belongs to.
///
/// Assigned on first store and never mutated afterwards. `Curated` is a
/// virtual origin: notebook lines surface with it at recall time, but no
/// entry is ever stored under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    /// Exact/near-exact short facts with O(1) n-gram lookup
    Factual,
    /// Bulk durable store with surprise filtering and decay
    #[default]
    LongTerm,
    /// Consolidated patterns with multi-tier update frequencies
    Semantic,
    /// Daily append-only logs and the curated notebook
    Episodic,
    /// Virtual origin for curated notebook lines (recall only)
    Curated,
}

impl MemoryLayer {
    /// The four storable layers, in routing priority order.
    pub const STORABLE: [MemoryLayer; 4] = [
        MemoryLayer::Factual,
        MemoryLayer::LongTerm,
        MemoryLayer::Semantic,
        MemoryLayer::Episodic,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::Factual => "factual",
            MemoryLayer::LongTerm => "long_term",
            MemoryLayer::Semantic => "semantic",
            MemoryLayer::Episodic => "episodic",
            MemoryLayer::Curated => "curated",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "factual" => Some(MemoryLayer::Factual),
            "long_term" | "longterm" | "long-term" => Some(MemoryLayer::LongTerm),
            "semantic" => Some(MemoryLayer::Semantic),
            "episodic" => Some(MemoryLayer::Episodic),
            "curated" => Some(MemoryLayer::Curated),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_name(s).ok_or_else(|| format!("Unknown memory layer: {}", s))
    }
}

// ============================================================================
// MEMORY SOURCE
// ============================================================================

/// How an entry entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Stored by the automatic ingestion path
    #[default]
    Auto,
    /// Stored by an explicit caller request
    Manual,
    /// Synthesized during a pre-compaction flush
    Compaction,
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySource::Auto => write!(f, "auto"),
            MemorySource::Manual => write!(f, "manual"),
            MemorySource::Compaction => write!(f, "compaction"),
        }
    }
}

// ============================================================================
// ENGINE STATISTICS
// ============================================================================

/// Per-layer and aggregate counts for the engine.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Entries in the factual layer
    pub factual: usize,
    /// Entries in the long-term layer
    pub long_term: usize,
    /// Patterns in the semantic layer
    pub semantic: usize,
    /// Log entries in the episodic layer
    pub episodic: usize,
    /// Sections in the curated notebook
    pub curated_sections: usize,
    /// Sum of all stored entries (notebook excluded)
    pub total: usize,
}
