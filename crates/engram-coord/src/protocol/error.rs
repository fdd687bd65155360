//! Protocol error codes.

use serde::{Deserialize, Serialize};

/// Closed set of wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame failed to parse or carried an unknown discriminant
    InvalidMessage,
    /// Sender is not allowed to perform the operation
    Unauthorized,
    /// Referenced entity does not exist
    NotFound,
    /// Conflicting concurrent operation
    Conflict,
    /// Lock operation failed
    LockFailed,
    /// Operation exceeded its deadline
    Timeout,
    /// Server capacity exceeded
    RateLimited,
    /// Unexpected server failure
    InternalError,
    /// Peer connection is gone
    ConnectionClosed,
    /// Operation requires a registered agent
    AgentNotRegistered,
    /// Agent lacks the required capability
    InvalidCapability,
}

impl ErrorCode {
    /// Whether the sender may retry after this error.
    ///
    /// Everything is recoverable except a malformed frame and an
    /// authorization failure.
    pub fn recoverable(&self) -> bool {
        !matches!(self, ErrorCode::InvalidMessage | ErrorCode::Unauthorized)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::LockFailed => "LOCK_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::AgentNotRegistered => "AGENT_NOT_REGISTERED",
            ErrorCode::InvalidCapability => "INVALID_CAPABILITY",
        };
        write!(f, "{name}")
    }
}

/// Local protocol failure, before anything reaches the actor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// Frame failed to decode
    #[error("invalid message: {0}")]
    Invalid(String),
    /// Payload did not match the discriminant's schema
    #[error("bad payload: {0}")]
    BadPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(!ErrorCode::InvalidMessage.recoverable());
        assert!(!ErrorCode::Unauthorized.recoverable());
        for code in [
            ErrorCode::NotFound,
            ErrorCode::Conflict,
            ErrorCode::LockFailed,
            ErrorCode::Timeout,
            ErrorCode::RateLimited,
            ErrorCode::InternalError,
            ErrorCode::ConnectionClosed,
            ErrorCode::AgentNotRegistered,
            ErrorCode::InvalidCapability,
        ] {
            assert!(code.recoverable(), "{code} should be recoverable");
        }
    }

    #[test]
    fn test_wire_casing() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidCapability).unwrap(),
            r#""INVALID_CAPABILITY""#
        );
    }
}
