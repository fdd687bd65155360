//! Agent-side client.
//!
//! A typed wrapper over an attached connection: register/resume,
//! heartbeats, lock requests with queued-grant waiting, subscriptions,
//! and memory-event publishing. Correlated request/reply pairs are
//! matched on `correlationId`; anything else that arrives while waiting
//! (broadcasts, queued grants, disconnect notices) is parked in an inbox
//! and handed out by [`AgentClient::next_event`] in arrival order.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use crate::protocol::{
    AgentInfo, AgentType, Capability, ConflictResolutionPayload, Envelope, ErrorPayload,
    ListResponsePayload, LockDeniedPayload, LockDeniedReason, LockGrantedPayload, LockMode,
    LockReleasePayload, LockRequestPayload, LockResource, MemoryEventPayload, MessageType,
    RegisterPayload, RegisteredPayload, SubscribeAckPayload, SubscribePayload, SubscriptionFilter,
    UnsubscribePayload,
};
use crate::server::{ClientConn, CoordHandle};

/// How long the client waits for a correlated reply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ERRORS
// ============================================================================

/// Client-side failure.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server closed the connection
    #[error("connection closed")]
    ConnectionClosed,
    /// No reply arrived within the request deadline
    #[error("request timed out")]
    Timeout,
    /// The server answered with an error envelope
    #[error("server error {code}: {message}", code = .0.code, message = .0.message)]
    Server(ErrorPayload),
    /// A reply arrived with an unexpected shape
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// SPEC
// ============================================================================

/// What an agent registers as.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Desired agent id; `None` lets the server assign one
    pub id: Option<String>,
    /// Human-readable name
    pub name: String,
    /// Agent role
    pub agent_type: AgentType,
    /// Held capabilities
    pub capabilities: Vec<Capability>,
    /// Resume token from a prior session
    pub resume_token: Option<String>,
}

impl AgentSpec {
    /// A worker spec with the given id and capabilities.
    pub fn worker(id: impl Into<String>, capabilities: &[Capability]) -> Self {
        let id = id.into();
        Self {
            name: format!("agent {id}"),
            id: Some(id),
            agent_type: AgentType::Worker,
            capabilities: capabilities.to_vec(),
            resume_token: None,
        }
    }
}

/// Outcome of a lock request.
#[derive(Debug, Clone)]
pub enum LockOutcome {
    /// Held immediately
    Granted(LockGrantedPayload),
    /// Enqueued; [`AgentClient::await_grant`] with the request id waits
    /// for the handoff
    Queued {
        /// 1-based wait-queue position
        position: usize,
        /// Request id the eventual grant will correlate to
        request_id: String,
    },
    /// The wait queue was full; nothing is pending
    QueueFull,
}

// ============================================================================
// CLIENT
// ============================================================================

/// A registered agent connection.
pub struct AgentClient {
    agent_id: String,
    resume_token: String,
    heartbeat_interval_ms: u64,
    conn: ClientConn,
    inbox: VecDeque<Envelope>,
}

impl AgentClient {
    /// Attach and register in one step.
    pub async fn register(handle: &CoordHandle, spec: AgentSpec) -> Result<Self> {
        let conn = handle
            .connect()
            .await
            .ok_or(ClientError::ConnectionClosed)?;
        let sender = spec.id.clone().unwrap_or_else(|| "unregistered".to_string());
        let request = Envelope::new(
            &sender,
            MessageType::AgentRegister,
            &RegisterPayload {
                agent_id: spec.id,
                name: spec.name,
                agent_type: spec.agent_type,
                capabilities: spec.capabilities,
                resume_token: spec.resume_token,
            },
        );

        let mut client = Self {
            agent_id: sender,
            resume_token: String::new(),
            heartbeat_interval_ms: 0,
            conn,
            inbox: VecDeque::new(),
        };
        let reply = client.request(request).await?;
        if reply.msg_type != MessageType::AgentRegistered {
            return Err(ClientError::Protocol(format!(
                "expected agent.registered, got {}",
                reply.msg_type
            )));
        }
        let payload: RegisteredPayload = reply
            .parse_payload()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        client.agent_id = payload.agent_id;
        client.resume_token = payload.resume_token;
        client.heartbeat_interval_ms = payload.heartbeat_interval_ms;
        debug!(agent_id = %client.agent_id, "registered");
        Ok(client)
    }

    /// The id the server knows this agent by.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Single-use token for reclaiming this identity after a reconnect.
    pub fn resume_token(&self) -> &str {
        &self.resume_token
    }

    /// Cadence the server expects heartbeats at.
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    // ------------------------------------------------------------------
    // Request/reply plumbing
    // ------------------------------------------------------------------

    fn envelope<P: serde::Serialize>(&self, msg_type: MessageType, payload: &P) -> Envelope {
        Envelope::new(&self.agent_id, msg_type, payload)
    }

    /// Send and await the reply correlated to the request id. Unrelated
    /// traffic is parked in the inbox.
    async fn request(&mut self, envelope: Envelope) -> Result<Envelope> {
        let request_id = envelope.id.clone();
        self.conn.send(envelope);
        self.recv_correlated(&request_id).await
    }

    async fn recv_correlated(&mut self, request_id: &str) -> Result<Envelope> {
        let deadline = tokio::time::Instant::now() + REQUEST_TIMEOUT;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(ClientError::Timeout)?;
            let envelope = tokio::time::timeout(remaining, self.conn.recv())
                .await
                .map_err(|_| ClientError::Timeout)?
                .ok_or(ClientError::ConnectionClosed)?;

            if envelope.correlation_id.as_deref() == Some(request_id) {
                if envelope.msg_type == MessageType::Error {
                    let payload: ErrorPayload = envelope
                        .parse_payload()
                        .map_err(|e| ClientError::Protocol(e.to_string()))?;
                    return Err(ClientError::Server(payload));
                }
                return Ok(envelope);
            }
            self.inbox.push_back(envelope);
        }
    }

    /// Next non-correlated envelope: broadcasts, queued grants,
    /// disconnect notices.
    pub async fn next_event(&mut self) -> Result<Envelope> {
        if let Some(envelope) = self.inbox.pop_front() {
            return Ok(envelope);
        }
        tokio::time::timeout(REQUEST_TIMEOUT, self.conn.recv())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::ConnectionClosed)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Send a heartbeat and await the ack.
    pub async fn heartbeat(&mut self) -> Result<()> {
        let request = self.envelope(MessageType::AgentHeartbeat, &serde_json::json!({}));
        let reply = self.request(request).await?;
        if reply.msg_type != MessageType::AgentHeartbeatAck {
            return Err(ClientError::Protocol(format!(
                "expected heartbeat ack, got {}",
                reply.msg_type
            )));
        }
        Ok(())
    }

    /// List every agent the server knows.
    pub async fn list_agents(&mut self) -> Result<Vec<AgentInfo>> {
        let request = self.envelope(MessageType::AgentList, &serde_json::json!({}));
        let reply = self.request(request).await?;
        let payload: ListResponsePayload = reply
            .parse_payload()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        Ok(payload.agents)
    }

    /// Request a lock; queued outcomes carry the request id for
    /// [`Self::await_grant`].
    pub async fn request_lock(
        &mut self,
        resource: LockResource,
        mode: LockMode,
        timeout_ms: Option<u64>,
    ) -> Result<LockOutcome> {
        let request = self.envelope(
            MessageType::LockRequest,
            &LockRequestPayload {
                resource,
                mode,
                timeout_ms,
            },
        );
        let request_id = request.id.clone();
        let reply = self.request(request).await?;
        match reply.msg_type {
            MessageType::LockGranted => {
                let payload: LockGrantedPayload = reply
                    .parse_payload()
                    .map_err(|e| ClientError::Protocol(e.to_string()))?;
                Ok(LockOutcome::Granted(payload))
            }
            MessageType::LockDenied => {
                let payload: LockDeniedPayload = reply
                    .parse_payload()
                    .map_err(|e| ClientError::Protocol(e.to_string()))?;
                match payload.reason {
                    LockDeniedReason::AlreadyLocked => Ok(LockOutcome::Queued {
                        position: payload.wait_queue_position.unwrap_or(1),
                        request_id,
                    }),
                    LockDeniedReason::QueueFull => Ok(LockOutcome::QueueFull),
                }
            }
            other => Err(ClientError::Protocol(format!(
                "unexpected lock reply: {other}"
            ))),
        }
    }

    /// Wait for the queued grant correlated to `request_id`.
    pub async fn await_grant(&mut self, request_id: &str) -> Result<LockGrantedPayload> {
        // The grant may already be parked in the inbox.
        if let Some(position) = self.inbox.iter().position(|e| {
            e.msg_type == MessageType::LockGranted
                && e.correlation_id.as_deref() == Some(request_id)
        }) {
            let envelope = self.inbox.remove(position).ok_or(ClientError::Timeout)?;
            return envelope
                .parse_payload()
                .map_err(|e| ClientError::Protocol(e.to_string()));
        }
        let envelope = self.recv_correlated(request_id).await?;
        if envelope.msg_type != MessageType::LockGranted {
            return Err(ClientError::Protocol(format!(
                "expected queued grant, got {}",
                envelope.msg_type
            )));
        }
        envelope
            .parse_payload()
            .map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Release a held lock and await the confirmation.
    pub async fn release_lock(&mut self, lock_id: &str) -> Result<()> {
        let request = self.envelope(
            MessageType::LockRelease,
            &LockReleasePayload {
                lock_id: lock_id.to_string(),
            },
        );
        let reply = self.request(request).await?;
        if reply.msg_type != MessageType::LockReleased {
            return Err(ClientError::Protocol(format!(
                "expected lock released, got {}",
                reply.msg_type
            )));
        }
        Ok(())
    }

    /// Subscribe to events; returns the subscription id.
    pub async fn subscribe(&mut self, filter: SubscriptionFilter) -> Result<String> {
        let request = self.envelope(MessageType::Subscribe, &SubscribePayload { filter });
        let reply = self.request(request).await?;
        let payload: SubscribeAckPayload = reply
            .parse_payload()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        Ok(payload.subscription_id)
    }

    /// Drop a subscription.
    pub async fn unsubscribe(&mut self, subscription_id: &str) -> Result<()> {
        let request = self.envelope(
            MessageType::Unsubscribe,
            &UnsubscribePayload {
                subscription_id: subscription_id.to_string(),
            },
        );
        self.request(request).await.map(|_| ())
    }

    /// Publish a memory event; fire-and-forget, the server fans it out.
    pub fn publish(&self, msg_type: MessageType, payload: &MemoryEventPayload) {
        self.conn.send(self.envelope(msg_type, payload));
    }

    /// Announce a conflict resolution (requires the arbitrate
    /// capability server-side).
    pub fn resolve_conflict(&self, payload: &ConflictResolutionPayload) {
        self.conn
            .send(self.envelope(MessageType::ConflictResolution, payload));
    }

    /// Announce departure and drop the connection.
    pub fn disconnect(self) {
        self.conn.send(self.envelope(
            MessageType::AgentDisconnect,
            &serde_json::json!({ "reason": "explicit" }),
        ));
        self.conn.close();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordConfig;
    use crate::server::spawn_actor;

    fn spec(id: &str, capabilities: &[Capability]) -> AgentSpec {
        AgentSpec::worker(id, capabilities)
    }

    #[tokio::test]
    async fn test_register_and_heartbeat() {
        let (handle, _task) = spawn_actor(CoordConfig::default(), None);
        let mut client = AgentClient::register(&handle, spec("A", &[])).await.unwrap();
        assert_eq!(client.agent_id(), "A");
        assert!(!client.resume_token().is_empty());
        assert_eq!(client.heartbeat_interval_ms(), 30_000);
        client.heartbeat().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_roundtrip_through_client() {
        let (handle, _task) = spawn_actor(CoordConfig::default(), None);
        let mut a = AgentClient::register(&handle, spec("A", &[Capability::Coordinate]))
            .await
            .unwrap();
        let mut b = AgentClient::register(&handle, spec("B", &[Capability::Coordinate]))
            .await
            .unwrap();

        let resource = LockResource::Memory("M1".to_string());
        let LockOutcome::Granted(grant_a) = a
            .request_lock(resource.clone(), LockMode::Exclusive, None)
            .await
            .unwrap()
        else {
            panic!("A should hold the lock");
        };

        let LockOutcome::Queued { position, request_id } = b
            .request_lock(resource.clone(), LockMode::Exclusive, None)
            .await
            .unwrap()
        else {
            panic!("B should queue");
        };
        assert_eq!(position, 1);

        a.release_lock(&grant_a.lock_id).await.unwrap();
        let grant_b = b.await_grant(&request_id).await.unwrap();
        assert_ne!(grant_b.lock_id, grant_a.lock_id);
        assert_eq!(grant_b.mode, LockMode::Exclusive);
    }

    #[tokio::test]
    async fn test_lock_without_capability_is_server_error() {
        let (handle, _task) = spawn_actor(CoordConfig::default(), None);
        let mut client = AgentClient::register(&handle, spec("A", &[])).await.unwrap();
        let err = client
            .request_lock(LockResource::Global, LockMode::Exclusive, None)
            .await
            .unwrap_err();
        let ClientError::Server(payload) = err else {
            panic!("expected a server error");
        };
        assert_eq!(payload.code, crate::protocol::ErrorCode::InvalidCapability);
    }

    #[tokio::test]
    async fn test_subscribe_and_receive_published_event() {
        let (handle, _task) = spawn_actor(CoordConfig::default(), None);
        let mut watcher = AgentClient::register(&handle, spec("watcher", &[])).await.unwrap();
        let writer =
            AgentClient::register(&handle, spec("writer", &[Capability::MemoryWrite]))
                .await
                .unwrap();

        watcher.subscribe(SubscriptionFilter::default()).await.unwrap();
        writer.publish(
            MessageType::MemoryUpdated,
            &MemoryEventPayload {
                memory_id: Some("M3".to_string()),
                content: Some("fresh".to_string()),
                ..Default::default()
            },
        );

        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.msg_type, MessageType::MemoryUpdated);
        assert_eq!(event.sender, "writer");
    }

    #[tokio::test]
    async fn test_list_agents() {
        let (handle, _task) = spawn_actor(CoordConfig::default(), None);
        let mut a = AgentClient::register(&handle, spec("A", &[])).await.unwrap();
        let _b = AgentClient::register(&handle, spec("B", &[])).await.unwrap();

        let agents = a.list_agents().await.unwrap();
        let ids: Vec<&str> = agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
