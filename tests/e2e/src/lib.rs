//! Shared harness for the end-to-end scenario tests.

use std::time::Duration;

use engram_coord::server::{ClientConn, CoordHandle};
use engram_coord::{
    Capability, CoordConfig, Envelope, LockMode, LockRequestPayload, LockResource, MessageType,
    RegisterPayload, RegisteredPayload, SubscribePayload, SubscriptionFilter,
};

/// How long a test waits for any single expected envelope.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A coordination config with test-friendly fast timers.
pub fn fast_config() -> CoordConfig {
    CoordConfig {
        heartbeat_timeout_ms: 60_000,
        lock_expiry_ms: 60_000,
        ..CoordConfig::default()
    }
}

/// A register envelope for `agent_id` with the given capabilities.
pub fn register_envelope(agent_id: &str, capabilities: &[Capability]) -> Envelope {
    Envelope::new(
        agent_id,
        MessageType::AgentRegister,
        &RegisterPayload {
            agent_id: Some(agent_id.to_string()),
            name: format!("agent {agent_id}"),
            agent_type: Default::default(),
            capabilities: capabilities.to_vec(),
            resume_token: None,
        },
    )
}

/// A lock request envelope; returns (envelope, request id).
pub fn lock_request(agent_id: &str, resource: LockResource, mode: LockMode) -> (Envelope, String) {
    let envelope = Envelope::new(
        agent_id,
        MessageType::LockRequest,
        &LockRequestPayload {
            resource,
            mode,
            timeout_ms: None,
        },
    );
    let id = envelope.id.clone();
    (envelope, id)
}

/// A subscribe envelope with the given filter.
pub fn subscribe_envelope(agent_id: &str, filter: SubscriptionFilter) -> Envelope {
    Envelope::new(agent_id, MessageType::Subscribe, &SubscribePayload { filter })
}

/// Receive the next envelope, failing the test on timeout.
pub async fn recv(conn: &mut ClientConn) -> Envelope {
    tokio::time::timeout(RECV_TIMEOUT, conn.recv())
        .await
        .expect("timed out waiting for an envelope")
        .expect("connection closed unexpectedly")
}

/// Receive envelopes until one of `msg_type` arrives, skipping others.
pub async fn recv_type(conn: &mut ClientConn, msg_type: MessageType) -> Envelope {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or(Duration::ZERO);
        let envelope = tokio::time::timeout(remaining, conn.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {msg_type}"))
            .unwrap_or_else(|| panic!("connection closed waiting for {msg_type}"));
        if envelope.msg_type == msg_type {
            return envelope;
        }
    }
}

/// Connect and register an agent; returns the connection and the
/// `agent.registered` payload.
pub async fn register(
    handle: &CoordHandle,
    agent_id: &str,
    capabilities: &[Capability],
) -> (ClientConn, RegisteredPayload) {
    let mut conn = handle.connect().await.expect("actor alive");
    conn.send(register_envelope(agent_id, capabilities));
    let registered = recv_type(&mut conn, MessageType::AgentRegistered).await;
    let payload: RegisteredPayload = registered.parse_payload().expect("registered payload");
    (conn, payload)
}
