//! Subscription table and filter matching.
//!
//! Each subscription is `{agent, filter}` under an allocated id. Matching
//! is the conjunction of the filter's non-empty fields; an empty filter
//! receives everything. Fan-out iterates subscriptions in insertion
//! order so per-subscriber delivery preserves source order.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::SubscriptionFilter;

// ============================================================================
// EVENT METADATA
// ============================================================================

/// The matchable facts about one broadcast event.
#[derive(Debug, Clone, Default)]
pub struct EventMeta<'a> {
    /// Dotted event type, e.g. `memory.added`
    pub event_type: &'a str,
    /// Layer the event concerns, if any
    pub layer: Option<&'a str>,
    /// Project the event concerns, if any
    pub project_id: Option<&'a str>,
    /// Tags on the event
    pub tags: &'a [String],
    /// Originating agent (or `server`)
    pub sender: &'a str,
}

/// Conjunction matching: every non-empty filter field must accept.
pub fn matches_filter(filter: &SubscriptionFilter, event: &EventMeta<'_>) -> bool {
    if !filter.event_types.is_empty()
        && !filter.event_types.iter().any(|t| t == event.event_type)
    {
        return false;
    }
    if !filter.layers.is_empty() {
        let Some(layer) = event.layer else {
            return false;
        };
        if !filter.layers.iter().any(|l| l == layer) {
            return false;
        }
    }
    if !filter.project_ids.is_empty() {
        let Some(project) = event.project_id else {
            return false;
        };
        if !filter.project_ids.iter().any(|p| p == project) {
            return false;
        }
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| event.tags.contains(t)) {
        return false;
    }
    if !filter.sender_ids.is_empty() && !filter.sender_ids.iter().any(|s| s == event.sender) {
        return false;
    }
    true
}

// ============================================================================
// TABLE
// ============================================================================

struct Subscription {
    agent_id: String,
    filter: SubscriptionFilter,
}

/// The subscription table.
#[derive(Default)]
pub struct SubscriptionTable {
    subscriptions: HashMap<String, Subscription>,
    /// Insertion order of subscription ids
    order: Vec<String>,
}

impl SubscriptionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription; returns its id.
    pub fn add(&mut self, agent_id: &str, filter: SubscriptionFilter) -> String {
        let id = Uuid::new_v4().to_string();
        self.subscriptions.insert(
            id.clone(),
            Subscription {
                agent_id: agent_id.to_string(),
                filter,
            },
        );
        self.order.push(id.clone());
        id
    }

    /// Remove a subscription; only its owner may do so.
    pub fn remove(&mut self, subscription_id: &str, agent_id: &str) -> bool {
        let owned = self
            .subscriptions
            .get(subscription_id)
            .is_some_and(|s| s.agent_id == agent_id);
        if owned {
            self.subscriptions.remove(subscription_id);
            self.order.retain(|id| id != subscription_id);
        }
        owned
    }

    /// Scrub every subscription an agent holds.
    pub fn remove_agent(&mut self, agent_id: &str) -> usize {
        let doomed: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.agent_id == agent_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            self.subscriptions.remove(id);
        }
        self.order.retain(|id| !doomed.contains(id));
        doomed.len()
    }

    /// Agents whose filters accept the event, in subscription insertion
    /// order, deduplicated.
    pub fn recipients(&self, event: &EventMeta<'_>) -> Vec<String> {
        let mut agents = Vec::new();
        for id in &self.order {
            let Some(subscription) = self.subscriptions.get(id) else {
                continue;
            };
            if matches_filter(&subscription.filter, event)
                && !agents.contains(&subscription.agent_id)
            {
                agents.push(subscription.agent_id.clone());
            }
        }
        agents
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
