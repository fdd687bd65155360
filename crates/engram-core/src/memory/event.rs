//! Engine events for coordination fan-out.
//!
//! Every committed mutation emits one of these on the engine's broadcast
//! channel. The coordination server forwards them to matching subscribers;
//! events are emitted only after the write commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MemoryLayer;

/// Memory lifecycle events emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MemoryEvent {
    /// A memory was stored
    #[serde(rename_all = "camelCase")]
    Added {
        id: String,
        layer: MemoryLayer,
        content_preview: String,
        project_id: Option<String>,
        tags: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A memory's content or metadata changed
    #[serde(rename_all = "camelCase")]
    Updated {
        id: String,
        layer: MemoryLayer,
        timestamp: DateTime<Utc>,
    },
    /// A memory was deleted
    #[serde(rename_all = "camelCase")]
    Deleted {
        id: String,
        layer: MemoryLayer,
        timestamp: DateTime<Utc>,
    },
    /// A recall completed
    #[serde(rename_all = "camelCase")]
    Recalled {
        query: String,
        result_count: usize,
        result_ids: Vec<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A prune pass removed decayed entries
    #[serde(rename_all = "camelCase")]
    Pruned {
        layer: MemoryLayer,
        removed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl MemoryEvent {
    /// The memory id this event concerns, when it concerns exactly one.
    pub fn memory_id(&self) -> Option<&str> {
        match self {
            MemoryEvent::Added { id, .. }
            | MemoryEvent::Updated { id, .. }
            | MemoryEvent::Deleted { id, .. } => Some(id),
            MemoryEvent::Recalled { .. } | MemoryEvent::Pruned { .. } => None,
        }
    }

    /// The layer this event concerns, when any.
    pub fn layer(&self) -> Option<MemoryLayer> {
        match self {
            MemoryEvent::Added { layer, .. }
            | MemoryEvent::Updated { layer, .. }
            | MemoryEvent::Deleted { layer, .. }
            | MemoryEvent::Pruned { layer, .. } => Some(*layer),
            MemoryEvent::Recalled { .. } => None,
        }
    }

    /// Wire-level event name in the coordination protocol's dotted form.
    pub fn wire_type(&self) -> &'static str {
        match self {
            MemoryEvent::Added { .. } => "memory.added",
            MemoryEvent::Updated { .. } => "memory.updated",
            MemoryEvent::Deleted { .. } => "memory.deleted",
            MemoryEvent::Recalled { .. } => "memory.recalled",
            MemoryEvent::Pruned { .. } => "memory.deleted",
        }
    }

    /// Serialize to JSON for transmission; falls back to `{}` on failure.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = MemoryEvent::Added {
            id: "m1".to_string(),
            layer: MemoryLayer::LongTerm,
            content_preview: "hello".to_string(),
            project_id: None,
            tags: vec![],
            timestamp: Utc::now(),
        };
        let json = event.to_json();
        assert!(json.contains("\"type\":\"Added\""));
        assert_eq!(event.memory_id(), Some("m1"));
        assert_eq!(event.wire_type(), "memory.added");
    }
}
