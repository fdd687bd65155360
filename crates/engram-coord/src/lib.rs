//! # Engram Coordination Server
//!
//! A persistent bidirectional message bus for agents sharing one memory
//! engine:
//!
//! - **Registry**: agent identities, capabilities, heartbeats, and
//!   single-use resume tokens
//! - **Locks**: exclusive/shared resource locks with FIFO wait queues,
//!   capacity caps, and expiry timers
//! - **Subscriptions**: filtered fan-out of memory events in source order
//! - **Conflict detection**: overlapping writes to one memory inside a
//!   bounded window notify all participants with a suggested strategy
//!
//! All state lives in a single-writer actor; connections, timers and the
//! engine's event stream re-enter it through one command channel. The
//! wire format is JSON envelopes, one per WebSocket text frame.

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;

pub use client::{AgentClient, AgentSpec, ClientError, LockOutcome};
pub use config::{CoordConfig, DEFAULT_PORT};
pub use protocol::{
    AgentInfo, AgentType, Capability, ConflictDetectedPayload, ConflictResolutionPayload,
    ConflictStrategy, DisconnectPayload, DisconnectReason, Envelope, ErrorCode, ErrorPayload,
    IdKind, LockDeniedPayload, LockDeniedReason, LockGrantedPayload, LockMode, LockReleasePayload,
    LockReleasedPayload, LockRequestPayload, LockResource, MemoryEventPayload, MessageType,
    RegisterPayload, RegisteredPayload, SubscribeAckPayload, SubscribePayload, SubscriptionFilter,
    UnsubscribePayload, decode_envelope, wire_id,
};
pub use server::{ClientConn, CoordHandle, CoordinationServer, spawn_actor};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
