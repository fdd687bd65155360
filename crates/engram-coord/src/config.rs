//! Coordination server configuration.

use crate::protocol::ConflictStrategy;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9876;

/// Tuning for the coordination server.
#[derive(Debug, Clone)]
pub struct CoordConfig {
    /// TCP port the WebSocket listener binds
    pub port: u16,
    /// Cadence clients are told to heartbeat at
    pub heartbeat_interval_ms: u64,
    /// Idle deadline before an agent is disconnected
    pub heartbeat_timeout_ms: u64,
    /// Default lock lifetime when a request names none
    pub lock_expiry_ms: u64,
    /// Registered-and-connected agent cap
    pub max_agents: usize,
    /// Per-resource wait queue cap
    pub max_wait_queue: usize,
    /// Window within which overlapping writes conflict
    pub conflict_window_ms: u64,
    /// Strategy suggested on detected conflicts
    pub default_conflict_strategy: ConflictStrategy,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            lock_expiry_ms: 60_000,
            max_agents: 100,
            max_wait_queue: 50,
            conflict_window_ms: 5_000,
            default_conflict_strategy: ConflictStrategy::LastWriteWins,
        }
    }
}

impl CoordConfig {
    /// Apply `ENGRAM_COORD_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("ENGRAM_COORD_PORT") {
            if let Ok(value) = port.parse() {
                self.port = value;
            }
        }
        if let Ok(timeout) = std::env::var("ENGRAM_COORD_HEARTBEAT_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse() {
                self.heartbeat_timeout_ms = value;
            }
        }
        if let Ok(expiry) = std::env::var("ENGRAM_COORD_LOCK_EXPIRY_MS") {
            if let Ok(value) = expiry.parse() {
                self.lock_expiry_ms = value;
            }
        }
        if let Ok(max) = std::env::var("ENGRAM_COORD_MAX_AGENTS") {
            if let Ok(value) = max.parse() {
                self.max_agents = value;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_spec() {
        let config = CoordConfig::default();
        assert_eq!(config.port, 9876);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.heartbeat_timeout_ms, 90_000);
        assert_eq!(config.lock_expiry_ms, 60_000);
        assert_eq!(config.max_agents, 100);
        assert_eq!(config.max_wait_queue, 50);
        assert_eq!(config.conflict_window_ms, 5_000);
        assert_eq!(
            config.default_conflict_strategy,
            ConflictStrategy::LastWriteWins
        );
    }
}
