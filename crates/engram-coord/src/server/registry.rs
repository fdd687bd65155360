//! Agent registry.
//!
//! Tracks registered agents, their capabilities, and resume tokens.
//! Identity is last-writer-wins: a new connection claiming a live agent
//! id supersedes the old one. Resume tokens are single-use; a successful
//! resume consumes the token and the `agent.registered` reply carries a
//! fresh one. Tokens live only in process memory.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::protocol::{
    AgentInfo, AgentType, Capability, IdKind, RegisterPayload, wire_id,
};

// ============================================================================
// TYPES
// ============================================================================

/// A registered agent.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    /// Agent id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Agent role
    pub agent_type: AgentType,
    /// Held capabilities
    pub capabilities: Vec<Capability>,
    /// Registration instant
    pub connected_at: DateTime<Utc>,
    /// Last heartbeat instant
    pub last_heartbeat: DateTime<Utc>,
}

impl RegisteredAgent {
    /// Wire-facing snapshot.
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            agent_type: self.agent_type,
            capabilities: self.capabilities.clone(),
            connected_at: self.connected_at,
            last_heartbeat: self.last_heartbeat,
            is_connected: true,
        }
    }
}

/// Outcome of a register attempt.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    /// Registered; `superseded` names an agent whose previous connection
    /// must be closed (same id reclaimed)
    Registered {
        /// Final agent id
        agent_id: String,
        /// Fresh single-use resume token
        resume_token: String,
        /// Prior live connection for this id, if one existed
        superseded: bool,
        /// Whether the identity was reclaimed through a resume token
        resumed: bool,
    },
    /// Registry at `max_agents`; nothing was stored
    AtCapacity,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The agent registry.
pub struct Registry {
    agents: HashMap<String, RegisteredAgent>,
    /// token → agent id; single-use
    resume_tokens: HashMap<String, String>,
    max_agents: usize,
}

impl Registry {
    /// A registry capped at `max_agents` live agents.
    pub fn new(max_agents: usize) -> Self {
        Self {
            agents: HashMap::new(),
            resume_tokens: HashMap::new(),
            max_agents,
        }
    }

    /// Handle a register payload.
    pub fn register(&mut self, payload: &RegisterPayload, now: DateTime<Utc>) -> RegisterOutcome {
        // A valid resume token reclaims the prior identity and is consumed.
        let (agent_id, resumed) = match payload
            .resume_token
            .as_ref()
            .and_then(|token| self.resume_tokens.remove(token))
        {
            Some(reclaimed) => (reclaimed, true),
            None => (
                payload
                    .agent_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                false,
            ),
        };

        let superseded = self.agents.contains_key(&agent_id);
        if !superseded && self.agents.len() >= self.max_agents {
            return RegisterOutcome::AtCapacity;
        }

        let connected_at = if resumed {
            // A resumed identity keeps its original connection instant.
            self.agents
                .get(&agent_id)
                .map(|a| a.connected_at)
                .unwrap_or(now)
        } else {
            now
        };

        self.agents.insert(
            agent_id.clone(),
            RegisteredAgent {
                id: agent_id.clone(),
                name: payload.name.clone(),
                agent_type: payload.agent_type,
                capabilities: payload.capabilities.clone(),
                connected_at,
                last_heartbeat: now,
            },
        );

        let resume_token = wire_id(IdKind::Resume);
        self.resume_tokens
            .insert(resume_token.clone(), agent_id.clone());

        RegisterOutcome::Registered {
            agent_id,
            resume_token,
            superseded,
            resumed,
        }
    }

    /// Record a heartbeat; false when the agent is unknown.
    pub fn heartbeat(&mut self, agent_id: &str, now: DateTime<Utc>) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Destroy an agent record. Resume tokens survive so the identity can
    /// be reclaimed by a later register.
    pub fn remove(&mut self, agent_id: &str) -> Option<RegisteredAgent> {
        self.agents.remove(agent_id)
    }

    /// Look up one agent.
    pub fn get(&self, agent_id: &str) -> Option<&RegisteredAgent> {
        self.agents.get(agent_id)
    }

    /// Whether an agent holds a capability.
    pub fn has_capability(&self, agent_id: &str, capability: Capability) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|a| a.capabilities.contains(&capability))
    }

    /// Number of live agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Wire-facing list of all agents.
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self.agents.values().map(|a| a.info()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// All live agent ids.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str, capabilities: &[Capability]) -> RegisterPayload {
        RegisterPayload {
            agent_id: Some(id.to_string()),
            name: format!("agent {id}"),
            agent_type: AgentType::Worker,
            capabilities: capabilities.to_vec(),
            resume_token: None,
        }
    }

    #[test]
    fn test_register_and_capabilities() {
        let mut registry = Registry::new(10);
        let outcome = registry.register(&payload("A", &[Capability::Coordinate]), Utc::now());
        let RegisterOutcome::Registered { agent_id, superseded, .. } = outcome else {
            panic!("should register");
        };
        assert_eq!(agent_id, "A");
        assert!(!superseded);
        assert!(registry.has_capability("A", Capability::Coordinate));
        assert!(!registry.has_capability("A", Capability::Arbitrate));
    }

    #[test]
    fn test_last_writer_wins_identity() {
        let mut registry = Registry::new(10);
        registry.register(&payload("A", &[]), Utc::now());
        let outcome = registry.register(&payload("A", &[]), Utc::now());
        let RegisterOutcome::Registered { superseded, .. } = outcome else {
            panic!();
        };
        assert!(superseded);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut registry = Registry::new(1);
        registry.register(&payload("A", &[]), Utc::now());
        assert!(matches!(
            registry.register(&payload("B", &[]), Utc::now()),
            RegisterOutcome::AtCapacity
        ));
        // Re-registering an existing id is not a new agent
        assert!(matches!(
            registry.register(&payload("A", &[]), Utc::now()),
            RegisterOutcome::Registered { .. }
        ));
    }

    #[test]
    fn test_resume_token_is_single_use() {
        let mut registry = Registry::new(10);
        let RegisterOutcome::Registered { resume_token, .. } =
            registry.register(&payload("A", &[]), Utc::now())
        else {
            panic!();
        };

        let mut resume = payload("ignored-id", &[]);
        resume.resume_token = Some(resume_token.clone());
        let RegisterOutcome::Registered { agent_id, resumed, .. } =
            registry.register(&resume, Utc::now())
        else {
            panic!();
        };
        // The token's identity wins over the payload id
        assert_eq!(agent_id, "A");
        assert!(resumed);

        // Spent token no longer resolves; the payload id is used instead
        let mut replay = payload("B", &[]);
        replay.resume_token = Some(resume_token);
        let RegisterOutcome::Registered { agent_id, resumed, .. } =
            registry.register(&replay, Utc::now())
        else {
            panic!();
        };
        assert_eq!(agent_id, "B");
        assert!(!resumed);
    }

    #[test]
    fn test_remove_keeps_tokens() {
        let mut registry = Registry::new(10);
        let RegisterOutcome::Registered { resume_token, .. } =
            registry.register(&payload("A", &[]), Utc::now())
        else {
            panic!();
        };
        registry.remove("A");
        assert!(registry.is_empty());

        let mut resume = payload("other", &[]);
        resume.resume_token = Some(resume_token);
        let RegisterOutcome::Registered { agent_id, .. } =
            registry.register(&resume, Utc::now())
        else {
            panic!();
        };
        assert_eq!(agent_id, "A");
    }
}
