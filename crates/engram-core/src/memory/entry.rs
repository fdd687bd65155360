//! Memory Entry - The fundamental unit of stored memory
//!
//! Each entry carries:
//! - Content and layer assignment
//! - A metadata bag with recognized keys (surprise, momentum, decay, utility)
//! - Feedback counters for utility-weighted ranking

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MemoryLayer, MemorySource};

/// Id prefix for ghost entries (surprise filtering rejected persistence).
pub const GHOST_ID_PREFIX: &str = "ghost_";

// ============================================================================
// METADATA
// ============================================================================

/// Heterogeneous metadata bag attached to every entry.
///
/// Recognized keys are typed fields; anything else round-trips through
/// `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    /// Tags for categorization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Owning project, used for data-dir and collection isolation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Session the entry was captured in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// How the entry entered the system
    #[serde(default)]
    pub source: MemorySource,
    /// Surprise score at store time (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surprise_score: Option<f64>,
    /// Momentum of recent surprise scores at store time (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub momentum: Option<f64>,
    /// Importance estimate (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Last time the entry was returned from a recall
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    /// Times feedback marked this entry helpful
    #[serde(default)]
    pub helpful_count: u32,
    /// Times feedback marked this entry harmful
    #[serde(default)]
    pub harmful_count: u32,
    /// Utility score = helpful / (helpful + harmful), 0.5 when unrated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utility_score: Option<f64>,
    /// Last helpful feedback instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_helpful: Option<DateTime<Utc>>,
    /// Last harmful feedback instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_harmful: Option<DateTime<Utc>>,
    /// Decay factor computed at the most recent query (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_decay: Option<f64>,
    /// Unrecognized keys, preserved verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl MemoryMetadata {
    /// Utility score with the unrated default of 0.5.
    pub fn utility(&self) -> f64 {
        let total = self.helpful_count + self.harmful_count;
        if total == 0 {
            0.5
        } else {
            f64::from(self.helpful_count) / f64::from(total)
        }
    }
}

// ============================================================================
// MEMORY ENTRY
// ============================================================================

/// A single stored memory.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Unique identifier (UUID v4; ghost entries use the `ghost_` prefix)
    pub id: String,
    /// The stored content, arbitrary UTF-8
    pub content: String,
    /// Layer assigned on first store; never mutates
    pub layer: MemoryLayer,
    /// Creation instant (UTC, millisecond precision)
    pub timestamp: DateTime<Utc>,
    /// Metadata bag
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl MemoryEntry {
    /// Create a new entry for `layer` with a fresh UUID and `now` timestamp.
    pub fn new(content: impl Into<String>, layer: MemoryLayer) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            layer,
            timestamp: Utc::now(),
            metadata: MemoryMetadata::default(),
        }
    }

    /// Create a ghost entry: observable outcome of a rejected store.
    ///
    /// Ghost entries are never persisted; their id carries the `ghost_`
    /// prefix so callers can tell them apart.
    pub fn ghost(content: impl Into<String>, layer: MemoryLayer) -> Self {
        let mut entry = Self::new(content, layer);
        entry.id = format!("{}{}", GHOST_ID_PREFIX, entry.id);
        entry
    }

    /// Whether this is a ghost entry.
    pub fn is_ghost(&self) -> bool {
        self.id.starts_with(GHOST_ID_PREFIX)
    }

    /// Builder-style tag attachment.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.metadata.tags = tags;
        self
    }

    /// Builder-style project attachment.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.metadata.project_id = Some(project_id.into());
        self
    }

    /// First `n` characters of the content, for event previews.
    pub fn content_preview(&self, n: usize) -> String {
        self.content.chars().take(n).collect()
    }
}

// ============================================================================
// INPUT / OUTCOME TYPES
// ============================================================================

/// Input for adding a memory.
///
/// Uses `deny_unknown_fields` to prevent field injection from untrusted
/// callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddInput {
    /// The content to memorize
    pub content: String,
    /// Explicit layer; `None` lets the engine route by content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<MemoryLayer>,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Owning project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Capturing session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Origin of the add (defaults to auto)
    #[serde(default)]
    pub source: MemorySource,
}

impl AddInput {
    /// Shorthand for a plain content add.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Outcome of an add: the entry plus whether persistence actually happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    /// The stored entry, or a ghost entry when filtering rejected the write
    pub entry: MemoryEntry,
    /// False when surprise filtering rejected persistence
    pub stored: bool,
    /// Surprise score that drove the decision, when the gate ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surprise_score: Option<f64>,
    /// Ids of similar recent memories found by the gate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similar_memories: Vec<String>,
}

impl AddOutcome {
    /// A stored outcome without a surprise decision (gate bypassed).
    pub fn stored(entry: MemoryEntry) -> Self {
        Self {
            entry,
            stored: true,
            surprise_score: None,
            similar_memories: Vec::new(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ghost_entry_prefix() {
        let ghost = MemoryEntry::ghost("duplicate", MemoryLayer::LongTerm);
        assert!(ghost.is_ghost());
        assert!(ghost.id.starts_with("ghost_"));

        let real = MemoryEntry::new("fresh", MemoryLayer::LongTerm);
        assert!(!real.is_ghost());
    }

    #[test]
    fn test_utility_default() {
        let meta = MemoryMetadata::default();
        assert!((meta.utility() - 0.5).abs() < 1e-9);

        let rated = MemoryMetadata {
            helpful_count: 3,
            harmful_count: 1,
            ..Default::default()
        };
        assert!((rated.utility() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_metadata_extra_roundtrip() {
        let json = r#"{"tags":["a"],"source":"manual","customKey":42}"#;
        let meta: MemoryMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.tags, vec!["a"]);
        assert_eq!(meta.source, MemorySource::Manual);
        assert_eq!(meta.extra.get("customKey"), Some(&serde_json::json!(42)));

        let back = serde_json::to_string(&meta).unwrap();
        assert!(back.contains("customKey"));
    }

    #[test]
    fn test_add_input_deny_unknown_fields() {
        let json = r#"{"content": "test", "tags": []}"#;
        assert!(serde_json::from_str::<AddInput>(json).is_ok());

        let json_with_unknown = r#"{"content": "test", "surpriseScore": 1.0}"#;
        assert!(serde_json::from_str::<AddInput>(json_with_unknown).is_err());
    }

    #[test]
    fn test_content_preview_is_char_safe() {
        let entry = MemoryEntry::new("héllo wörld", MemoryLayer::Factual);
        assert_eq!(entry.content_preview(5), "héllo");
    }
}
