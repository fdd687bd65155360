//! Wire protocol.
//!
//! Length-delimited UTF-8 JSON envelopes over a bidirectional byte
//! stream; the reference transport is WebSocket, where one text frame
//! carries exactly one envelope.

mod envelope;
mod error;
mod messages;

pub use envelope::{Envelope, IdKind, decode_envelope, wire_id};
pub use error::{ErrorCode, ProtocolError};
pub use messages::{
    AgentInfo, AgentType, Capability, ConflictDetectedPayload, ConflictResolutionPayload,
    ConflictStrategy, ConflictWrite, DisconnectPayload, DisconnectReason, ErrorPayload,
    HeartbeatAckPayload, ListResponsePayload, LockDeniedPayload, LockDeniedReason,
    LockGrantedPayload, LockMode, LockReleasePayload, LockReleasedPayload, LockRequestPayload,
    LockResource, MemoryEventPayload, MessageType, RegisterPayload, RegisteredPayload,
    SubscribeAckPayload, SubscribePayload, SubscriptionFilter, UnsubscribeAckPayload,
    UnsubscribePayload,
};
