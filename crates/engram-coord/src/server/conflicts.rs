//! Concurrent-write conflict detection.
//!
//! Every `memory.updated` appends a pending write under its memory id.
//! Two or more pending writes inside the window is a conflict: the
//! participants are notified with a suggested strategy. A sweep removes
//! entries older than the window; a resolution from an arbitrating agent
//! clears the slate for that memory.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::protocol::{
    ConflictDetectedPayload, ConflictStrategy, ConflictWrite, IdKind, wire_id,
};

/// One write awaiting its conflict window.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// Writing agent
    pub agent_id: String,
    /// Written content
    pub content: String,
    /// Arrival instant
    pub timestamp: DateTime<Utc>,
}

/// The conflict tracker.
pub struct ConflictTracker {
    window: Duration,
    suggested_strategy: ConflictStrategy,
    pending: HashMap<String, Vec<PendingWrite>>,
}

impl ConflictTracker {
    /// A tracker with the given window and suggested strategy.
    pub fn new(window_ms: u64, suggested_strategy: ConflictStrategy) -> Self {
        Self {
            window: Duration::milliseconds(window_ms.max(1) as i64),
            suggested_strategy,
            pending: HashMap::new(),
        }
    }

    /// Record a write; returns the conflict payload when the memory now
    /// has overlapping writes.
    pub fn record(
        &mut self,
        memory_id: &str,
        agent_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Option<ConflictDetectedPayload> {
        let writes = self.pending.entry(memory_id.to_string()).or_default();
        writes.push(PendingWrite {
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            timestamp: now,
        });

        if writes.len() < 2 {
            return None;
        }

        // Participants in arrival order, deduplicated
        let mut conflicting_agents: Vec<String> = Vec::new();
        for write in writes.iter() {
            if !conflicting_agents.contains(&write.agent_id) {
                conflicting_agents.push(write.agent_id.clone());
            }
        }

        Some(ConflictDetectedPayload {
            conflict_id: wire_id(IdKind::Conflict),
            memory_id: memory_id.to_string(),
            conflicting_agents,
            writes: writes
                .iter()
                .map(|w| ConflictWrite {
                    agent_id: w.agent_id.clone(),
                    content: w.content.clone(),
                    timestamp: w.timestamp,
                })
                .collect(),
            suggested_strategy: self.suggested_strategy,
        })
    }

    /// Drop writes older than the window; empty slots disappear.
    pub fn sweep(&mut self, memory_id: &str, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        if let Some(writes) = self.pending.get_mut(memory_id) {
            writes.retain(|w| w.timestamp > cutoff);
            if writes.is_empty() {
                self.pending.remove(memory_id);
            }
        }
    }

    /// A resolution clears the pending list for the memory.
    pub fn resolve(&mut self, memory_id: &str) -> bool {
        self.pending.remove(memory_id).is_some()
    }

    /// Pending write count for a memory.
    pub fn pending_len(&self, memory_id: &str) -> usize {
        self.pending.get(memory_id).map(|w| w.len()).unwrap_or(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ConflictTracker {
        ConflictTracker::new(5_000, ConflictStrategy::LastWriteWins)
    }

    #[test]
    fn test_single_write_no_conflict() {
        let mut tracker = tracker();
        assert!(tracker.record("M9", "A", "first", Utc::now()).is_none());
        assert_eq!(tracker.pending_len("M9"), 1);
    }

    #[test]
    fn test_overlapping_writes_conflict_in_arrival_order() {
        let mut tracker = tracker();
        let now = Utc::now();
        tracker.record("M9", "A", "va", now);
        let conflict = tracker.record("M9", "B", "vb", now).unwrap();

        assert_eq!(conflict.memory_id, "M9");
        assert_eq!(conflict.conflicting_agents, vec!["A", "B"]);
        assert_eq!(conflict.writes.len(), 2);
        assert_eq!(conflict.suggested_strategy, ConflictStrategy::LastWriteWins);
        assert!(conflict.conflict_id.starts_with("conflict_"));
    }

    #[test]
    fn test_different_memories_do_not_conflict() {
        let mut tracker = tracker();
        let now = Utc::now();
        assert!(tracker.record("M1", "A", "x", now).is_none());
        assert!(tracker.record("M2", "B", "y", now).is_none());
    }

    #[test]
    fn test_sweep_drops_stale_writes() {
        let mut tracker = tracker();
        let now = Utc::now();
        tracker.record("M9", "A", "old", now - Duration::seconds(10));
        tracker.sweep("M9", now);
        assert_eq!(tracker.pending_len("M9"), 0);

        // A write after the sweep starts a fresh window
        assert!(tracker.record("M9", "B", "new", now).is_none());
    }

    #[test]
    fn test_resolution_clears_pending() {
        let mut tracker = tracker();
        let now = Utc::now();
        tracker.record("M9", "A", "va", now);
        tracker.record("M9", "B", "vb", now);
        assert!(tracker.resolve("M9"));
        assert_eq!(tracker.pending_len("M9"), 0);
        assert!(!tracker.resolve("M9"));
    }
}
