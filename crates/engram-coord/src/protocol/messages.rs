//! Message discriminants and typed payloads.
//!
//! The `type` field of every envelope is one of the closed
//! [`MessageType`] set; each discriminant fixes its payload schema.
//! Unknown discriminants fail decoding and surface as INVALID_MESSAGE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::wire_date;
use super::error::ErrorCode;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// Closed set of message discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // -- agent lifecycle --
    #[serde(rename = "agent.register")]
    AgentRegister,
    #[serde(rename = "agent.registered")]
    AgentRegistered,
    #[serde(rename = "agent.heartbeat")]
    AgentHeartbeat,
    #[serde(rename = "agent.heartbeat_ack")]
    AgentHeartbeatAck,
    #[serde(rename = "agent.disconnect")]
    AgentDisconnect,
    #[serde(rename = "agent.list")]
    AgentList,
    #[serde(rename = "agent.list_response")]
    AgentListResponse,

    // -- memory events --
    #[serde(rename = "memory.added")]
    MemoryAdded,
    #[serde(rename = "memory.updated")]
    MemoryUpdated,
    #[serde(rename = "memory.deleted")]
    MemoryDeleted,
    #[serde(rename = "memory.recalled")]
    MemoryRecalled,

    // -- coordination --
    #[serde(rename = "coordination.lock_request")]
    LockRequest,
    #[serde(rename = "coordination.lock_granted")]
    LockGranted,
    #[serde(rename = "coordination.lock_denied")]
    LockDenied,
    #[serde(rename = "coordination.lock_release")]
    LockRelease,
    #[serde(rename = "coordination.lock_released")]
    LockReleased,

    // -- conflicts --
    #[serde(rename = "conflict.detected")]
    ConflictDetected,
    #[serde(rename = "conflict.resolution")]
    ConflictResolution,

    // -- subscriptions --
    #[serde(rename = "subscribe")]
    Subscribe,
    #[serde(rename = "subscribe_ack")]
    SubscribeAck,
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
    #[serde(rename = "unsubscribe_ack")]
    UnsubscribeAck,

    // -- errors --
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    /// Dotted wire name of this discriminant.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::AgentRegister => "agent.register",
            MessageType::AgentRegistered => "agent.registered",
            MessageType::AgentHeartbeat => "agent.heartbeat",
            MessageType::AgentHeartbeatAck => "agent.heartbeat_ack",
            MessageType::AgentDisconnect => "agent.disconnect",
            MessageType::AgentList => "agent.list",
            MessageType::AgentListResponse => "agent.list_response",
            MessageType::MemoryAdded => "memory.added",
            MessageType::MemoryUpdated => "memory.updated",
            MessageType::MemoryDeleted => "memory.deleted",
            MessageType::MemoryRecalled => "memory.recalled",
            MessageType::LockRequest => "coordination.lock_request",
            MessageType::LockGranted => "coordination.lock_granted",
            MessageType::LockDenied => "coordination.lock_denied",
            MessageType::LockRelease => "coordination.lock_release",
            MessageType::LockReleased => "coordination.lock_released",
            MessageType::ConflictDetected => "conflict.detected",
            MessageType::ConflictResolution => "conflict.resolution",
            MessageType::Subscribe => "subscribe",
            MessageType::SubscribeAck => "subscribe_ack",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::UnsubscribeAck => "unsubscribe_ack",
            MessageType::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// AGENT TYPES & CAPABILITIES
// ============================================================================

/// Role of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Session-owning agent
    Primary,
    /// Task worker
    #[default]
    Worker,
    /// Domain specialist
    Specialist,
    /// Read-only observer
    Observer,
}

/// Capabilities an agent may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read memories
    MemoryRead,
    /// Add and update memories
    MemoryWrite,
    /// Delete memories
    MemoryDelete,
    /// Request and release locks
    Coordinate,
    /// Resolve detected conflicts
    Arbitrate,
}

// ============================================================================
// AGENT PAYLOADS
// ============================================================================

/// `agent.register` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterPayload {
    /// Desired agent id; omitted ids are assigned by the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Human-readable name
    pub name: String,
    /// Agent role
    #[serde(default)]
    pub agent_type: AgentType,
    /// Held capabilities
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Token from a prior session to reclaim identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

/// `agent.registered` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPayload {
    /// Final agent id
    pub agent_id: String,
    /// Fresh single-use resume token
    pub resume_token: String,
    /// Expected heartbeat cadence
    pub heartbeat_interval_ms: u64,
    /// Idle deadline before a timeout disconnect
    pub heartbeat_timeout_ms: u64,
}

/// `agent.heartbeat_ack` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAckPayload {
    /// Server clock at ack time
    #[serde(with = "wire_date")]
    pub server_time: DateTime<Utc>,
}

/// Why an agent was disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectReason {
    /// Heartbeat deadline elapsed
    Timeout,
    /// Server is shutting down
    Shutdown,
    /// The agent asked to leave
    Explicit,
    /// A newer connection claimed the same identity
    Superseded,
    /// Transport or protocol failure
    Error,
}

/// `agent.disconnect` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    /// Why the agent is being disconnected
    pub reason: DisconnectReason,
}

/// One row of an `agent.list_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Agent id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Agent role
    pub agent_type: AgentType,
    /// Held capabilities
    pub capabilities: Vec<Capability>,
    /// Registration instant
    #[serde(with = "wire_date")]
    pub connected_at: DateTime<Utc>,
    /// Last heartbeat instant
    #[serde(with = "wire_date")]
    pub last_heartbeat: DateTime<Utc>,
    /// Whether a live connection backs the agent
    pub is_connected: bool,
}

/// `agent.list_response` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponsePayload {
    /// All known agents
    pub agents: Vec<AgentInfo>,
}

// ============================================================================
// LOCK PAYLOADS
// ============================================================================

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum LockResource {
    /// One memory entry
    Memory(String),
    /// A whole layer
    Layer(String),
    /// A whole project
    Project(String),
    /// Everything
    Global,
}

impl std::fmt::Display for LockResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockResource::Memory(id) => write!(f, "memory:{id}"),
            LockResource::Layer(layer) => write!(f, "layer:{layer}"),
            LockResource::Project(id) => write!(f, "project:{id}"),
            LockResource::Global => write!(f, "global"),
        }
    }
}

/// Lock sharing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Single holder
    #[default]
    Exclusive,
    /// Co-holders allowed with other shared holders
    Shared,
}

/// `coordination.lock_request` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LockRequestPayload {
    /// Resource to lock
    pub resource: LockResource,
    /// Requested mode
    #[serde(default)]
    pub mode: LockMode,
    /// Lock lifetime; server default applies when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// `coordination.lock_granted` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockGrantedPayload {
    /// Fresh lock id
    pub lock_id: String,
    /// Locked resource
    pub resource: LockResource,
    /// Granted mode
    pub mode: LockMode,
    /// Expiry instant; missing renewal loses the lock
    #[serde(with = "wire_date")]
    pub expires_at: DateTime<Utc>,
}

/// Why a lock was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDeniedReason {
    /// Another holder blocks the request; the requester was enqueued
    AlreadyLocked,
    /// The wait queue is at capacity; the requester was not enqueued
    QueueFull,
}

/// `coordination.lock_denied` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDeniedPayload {
    /// Contested resource
    pub resource: LockResource,
    /// Denial reason
    pub reason: LockDeniedReason,
    /// 1-based queue position when enqueued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_queue_position: Option<usize>,
}

/// `coordination.lock_release` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LockReleasePayload {
    /// Lock being released; only the holder may release it
    pub lock_id: String,
}

/// `coordination.lock_released` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReleasedPayload {
    /// Released lock id
    pub lock_id: String,
    /// Resource it protected
    pub resource: LockResource,
}

// ============================================================================
// MEMORY EVENT PAYLOAD
// ============================================================================

/// Payload shared by the `memory.*` events.
///
/// Fields are optional because different events populate different
/// subsets; `memory_id` + `content` for writes, `query` + `result_ids`
/// for recalls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEventPayload {
    /// Memory the event concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    /// Content for added/updated events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Layer the memory lives in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    /// Owning project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Tags on the memory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Query for recalled events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Result ids for recalled events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_ids: Vec<String>,
}

// ============================================================================
// CONFLICT PAYLOADS
// ============================================================================

/// Resolution strategies for overlapping writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Latest write becomes the value
    #[default]
    LastWriteWins,
    /// Earliest write becomes the value
    FirstWriteWins,
    /// Writes are merged
    Merge,
    /// An arbitrating agent decides
    Arbitrate,
    /// A human decides
    Manual,
}

/// One overlapping write inside a conflict window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictWrite {
    /// Writing agent
    pub agent_id: String,
    /// Written content
    pub content: String,
    /// Write instant
    #[serde(with = "wire_date")]
    pub timestamp: DateTime<Utc>,
}

/// `conflict.detected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetectedPayload {
    /// Conflict id
    pub conflict_id: String,
    /// Contested memory
    pub memory_id: String,
    /// Agents involved, in arrival order
    pub conflicting_agents: Vec<String>,
    /// The overlapping writes, in arrival order
    pub writes: Vec<ConflictWrite>,
    /// Suggested resolution
    pub suggested_strategy: ConflictStrategy,
}

/// `conflict.resolution` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConflictResolutionPayload {
    /// Conflict being resolved
    pub conflict_id: String,
    /// Contested memory
    pub memory_id: String,
    /// Strategy that was applied
    pub strategy: ConflictStrategy,
    /// Winning content, when the strategy produces one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_content: Option<String>,
}

// ============================================================================
// SUBSCRIPTION PAYLOADS
// ============================================================================

/// Event filter; empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscriptionFilter {
    /// Dotted event types, e.g. `memory.added`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,
    /// Memory layers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<String>,
    /// Project ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_ids: Vec<String>,
    /// Tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Sending agent ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sender_ids: Vec<String>,
}

/// `subscribe` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscribePayload {
    /// Filter; an empty filter receives every event
    #[serde(default)]
    pub filter: SubscriptionFilter,
}

/// `subscribe_ack` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAckPayload {
    /// Allocated subscription id
    pub subscription_id: String,
}

/// `unsubscribe` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnsubscribePayload {
    /// Subscription to remove
    pub subscription_id: String,
}

/// `unsubscribe_ack` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAckPayload {
    /// Removed subscription id
    pub subscription_id: String,
}

// ============================================================================
// ERROR PAYLOAD
// ============================================================================

/// `error` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Error code from the closed set
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
    /// Whether the sender may retry
    pub recoverable: bool,
}

impl ErrorPayload {
    /// An error payload with recoverability derived from the code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.recoverable(),
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
    fn test_message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::LockRequest).unwrap(),
            r#""coordination.lock_request""#
        );
        let parsed: MessageType = serde_json::from_str(r#""agent.heartbeat_ack""#).unwrap();
        assert_eq!(parsed, MessageType::AgentHeartbeatAck);
        assert_eq!(MessageType::LockRequest.as_str(), "coordination.lock_request");
    }

    #[test]
    fn test_lock_resource_tagging() {
        let resource = LockResource::Memory("M1".to_string());
        let json = serde_json::to_string(&resource).unwrap();
        assert_eq!(json, r#"{"kind":"memory","id":"M1"}"#);
        let back: LockResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resource);

        let global: LockResource = serde_json::from_str(r#"{"kind":"global"}"#).unwrap();
        assert_eq!(global, LockResource::Global);
    }

    #[test]
    fn test_register_payload_rejects_unknown_fields() {
        let json = r#"{"name":"a","agentType":"worker","capabilities":["coordinate"],"extra":1}"#;
        assert!(serde_json::from_str::<RegisterPayload>(json).is_err());
    }

    #[test]
    fn test_error_payload_recoverability() {
        let err = ErrorPayload::new(ErrorCode::RateLimited, "full");
        assert!(err.recoverable);
        let fatal = ErrorPayload::new(ErrorCode::InvalidMessage, "bad frame");
        assert!(!fatal.recoverable);
    }

    #[test]
    fn test_conflict_strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConflictStrategy::LastWriteWins).unwrap(),
            r#""last_write_wins""#
        );
    }
}
