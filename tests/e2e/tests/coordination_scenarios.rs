//! Coordination server scenarios: lock handoff, heartbeat timeout,
//! conflict detection, capacity boundaries, and subscription fan-out.

use std::sync::Arc;

use engram_coord::server::spawn_actor;
use engram_coord::{
    Capability, ConflictDetectedPayload, ConflictResolutionPayload, ConflictStrategy, CoordConfig,
    DisconnectPayload, DisconnectReason, Envelope, ErrorCode, ErrorPayload, LockDeniedPayload,
    LockDeniedReason, LockGrantedPayload, LockMode, LockReleasePayload, LockReleasedPayload,
    LockResource, MemoryEventPayload, MessageType, RegisterPayload, SubscriptionFilter,
};
use engram_core::{AddInput, MemoryEngine};
use engram_e2e_tests::{
    fast_config, lock_request, recv_type, register, register_envelope, subscribe_envelope,
};

fn m1() -> LockResource {
    LockResource::Memory("M1".to_string())
}

#[tokio::test]
async fn lock_handoff_carries_correlation_id() {
    let (handle, _task) = spawn_actor(fast_config(), None);

    let (mut conn_a, _) = register(&handle, "A", &[Capability::Coordinate]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::Coordinate]).await;

    // A takes the exclusive lock
    let (request_a, _) = lock_request("A", m1(), LockMode::Exclusive);
    conn_a.send(request_a);
    let granted_a = recv_type(&mut conn_a, MessageType::LockGranted).await;
    let grant_a: LockGrantedPayload = granted_a.parse_payload().unwrap();

    // B is denied and queued at position 1
    let (request_b, request_b_id) = lock_request("B", m1(), LockMode::Exclusive);
    conn_b.send(request_b);
    let denied = recv_type(&mut conn_b, MessageType::LockDenied).await;
    let denied_payload: LockDeniedPayload = denied.parse_payload().unwrap();
    assert_eq!(denied_payload.reason, LockDeniedReason::AlreadyLocked);
    assert_eq!(denied_payload.wait_queue_position, Some(1));

    // A releases; B gets a fresh lock correlated to its original request
    let release = Envelope::new(
        "A",
        MessageType::LockRelease,
        &LockReleasePayload {
            lock_id: grant_a.lock_id.clone(),
        },
    );
    conn_a.send(release);
    recv_type(&mut conn_a, MessageType::LockReleased).await;

    let granted_b = recv_type(&mut conn_b, MessageType::LockGranted).await;
    assert_eq!(granted_b.correlation_id.as_deref(), Some(request_b_id.as_str()));
    let grant_b: LockGrantedPayload = granted_b.parse_payload().unwrap();
    assert_ne!(grant_b.lock_id, grant_a.lock_id);
    assert_eq!(grant_b.mode, LockMode::Exclusive);
    assert_eq!(grant_b.resource, m1());
}

#[tokio::test]
async fn back_to_back_releases_drain_fifo() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::Coordinate]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::Coordinate]).await;
    let (mut conn_c, _) = register(&handle, "C", &[Capability::Coordinate]).await;

    let (request_a, _) = lock_request("A", m1(), LockMode::Exclusive);
    conn_a.send(request_a);
    let grant_a: LockGrantedPayload = recv_type(&mut conn_a, MessageType::LockGranted)
        .await
        .parse_payload()
        .unwrap();

    let (request_b, request_b_id) = lock_request("B", m1(), LockMode::Exclusive);
    conn_b.send(request_b);
    recv_type(&mut conn_b, MessageType::LockDenied).await;
    let (request_c, request_c_id) = lock_request("C", m1(), LockMode::Exclusive);
    conn_c.send(request_c);
    recv_type(&mut conn_c, MessageType::LockDenied).await;

    conn_a.send(Envelope::new(
        "A",
        MessageType::LockRelease,
        &LockReleasePayload {
            lock_id: grant_a.lock_id,
        },
    ));
    let granted_b = recv_type(&mut conn_b, MessageType::LockGranted).await;
    assert_eq!(granted_b.correlation_id.as_deref(), Some(request_b_id.as_str()));
    let grant_b: LockGrantedPayload = granted_b.parse_payload().unwrap();

    // Immediately release again; C must be next, under another fresh id
    conn_b.send(Envelope::new(
        "B",
        MessageType::LockRelease,
        &LockReleasePayload {
            lock_id: grant_b.lock_id.clone(),
        },
    ));
    let granted_c = recv_type(&mut conn_c, MessageType::LockGranted).await;
    assert_eq!(granted_c.correlation_id.as_deref(), Some(request_c_id.as_str()));
    let grant_c: LockGrantedPayload = granted_c.parse_payload().unwrap();
    assert_ne!(grant_c.lock_id, grant_b.lock_id);
}

#[tokio::test]
async fn concurrent_exclusive_requests_grant_exactly_one() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::Coordinate]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::Coordinate]).await;

    // Both requests race into the actor; it serializes them
    let (request_a, _) = lock_request("A", m1(), LockMode::Exclusive);
    let (request_b, _) = lock_request("B", m1(), LockMode::Exclusive);
    conn_a.send(request_a);
    conn_b.send(request_b);

    let reply_a = recv_type(&mut conn_a, MessageType::LockGranted).await;
    let reply_b = recv_type(&mut conn_b, MessageType::LockDenied).await;
    assert_eq!(reply_a.msg_type, MessageType::LockGranted);
    let denied: LockDeniedPayload = reply_b.parse_payload().unwrap();
    assert_eq!(denied.reason, LockDeniedReason::AlreadyLocked);
}

#[tokio::test]
async fn wait_queue_capacity_yields_queue_full() {
    let config = CoordConfig {
        max_wait_queue: 1,
        ..fast_config()
    };
    let (handle, _task) = spawn_actor(config, None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::Coordinate]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::Coordinate]).await;
    let (mut conn_c, _) = register(&handle, "C", &[Capability::Coordinate]).await;

    let (request_a, _) = lock_request("A", m1(), LockMode::Exclusive);
    conn_a.send(request_a);
    recv_type(&mut conn_a, MessageType::LockGranted).await;

    let (request_b, _) = lock_request("B", m1(), LockMode::Exclusive);
    conn_b.send(request_b);
    recv_type(&mut conn_b, MessageType::LockDenied).await;

    let (request_c, _) = lock_request("C", m1(), LockMode::Exclusive);
    conn_c.send(request_c);
    let denied: LockDeniedPayload = recv_type(&mut conn_c, MessageType::LockDenied)
        .await
        .parse_payload()
        .unwrap();
    assert_eq!(denied.reason, LockDeniedReason::QueueFull);
    assert_eq!(denied.wait_queue_position, None);
}

#[tokio::test]
async fn lock_requires_coordinate_capability() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn, _) = register(&handle, "observer", &[]).await;

    let (request, _) = lock_request("observer", m1(), LockMode::Exclusive);
    conn.send(request);
    let error = recv_type(&mut conn, MessageType::Error).await;
    let payload: ErrorPayload = error.parse_payload().unwrap();
    assert_eq!(payload.code, ErrorCode::InvalidCapability);
}

#[tokio::test]
async fn heartbeat_timeout_disconnects_and_releases() {
    let config = CoordConfig {
        heartbeat_timeout_ms: 200,
        ..CoordConfig::default()
    };
    let (handle, _task) = spawn_actor(config, None);

    let (mut conn_x, _) = register(&handle, "X", &[Capability::Coordinate]).await;
    let (mut conn_y, _) = register(&handle, "Y", &[Capability::Coordinate]).await;

    // X holds the lock; Y waits
    let (request_x, _) = lock_request("X", m1(), LockMode::Exclusive);
    conn_x.send(request_x);
    recv_type(&mut conn_x, MessageType::LockGranted).await;
    let (request_y, request_y_id) = lock_request("Y", m1(), LockMode::Exclusive);
    conn_y.send(request_y);
    recv_type(&mut conn_y, MessageType::LockDenied).await;

    // X goes silent past the 200 ms deadline (Y keeps heartbeating)
    let start = std::time::Instant::now();
    let disconnect = loop {
        conn_y.send(Envelope::new(
            "Y",
            MessageType::AgentHeartbeat,
            &serde_json::json!({}),
        ));
        if let Ok(Some(envelope)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), conn_x.recv()).await
        {
            if envelope.msg_type == MessageType::AgentDisconnect {
                break envelope;
            }
        }
        assert!(start.elapsed().as_secs() < 5, "no timeout disconnect arrived");
    };
    let payload: DisconnectPayload = disconnect.parse_payload().unwrap();
    assert_eq!(payload.reason, DisconnectReason::Timeout);

    // X's lock was released; Y is granted with its original request id
    let granted_y = recv_type(&mut conn_y, MessageType::LockGranted).await;
    assert_eq!(granted_y.correlation_id.as_deref(), Some(request_y_id.as_str()));

    // X's connection is gone
    assert!(
        tokio::time::timeout(std::time::Duration::from_secs(1), conn_x.recv())
            .await
            .ok()
            .flatten()
            .is_none()
    );
}

#[tokio::test]
async fn expired_lock_hands_off_like_a_release() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::Coordinate]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::Coordinate]).await;

    // A takes the lock with a 150 ms lifetime and never renews
    let request_a = Envelope::new(
        "A",
        MessageType::LockRequest,
        &engram_coord::LockRequestPayload {
            resource: m1(),
            mode: LockMode::Exclusive,
            timeout_ms: Some(150),
        },
    );
    conn_a.send(request_a);
    recv_type(&mut conn_a, MessageType::LockGranted).await;

    let (request_b, request_b_id) = lock_request("B", m1(), LockMode::Exclusive);
    conn_b.send(request_b);
    recv_type(&mut conn_b, MessageType::LockDenied).await;

    // Expiry fires; A is told the lock is gone and B inherits it
    let released = recv_type(&mut conn_a, MessageType::LockReleased).await;
    let payload: LockReleasedPayload = released.parse_payload().unwrap();
    assert_eq!(payload.resource, m1());

    let granted_b = recv_type(&mut conn_b, MessageType::LockGranted).await;
    assert_eq!(granted_b.correlation_id.as_deref(), Some(request_b_id.as_str()));
}

#[tokio::test]
async fn conflict_resolution_requires_arbitrate_and_broadcasts() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::MemoryWrite]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::MemoryWrite]).await;
    let (mut arbiter, _) = register(&handle, "judge", &[Capability::Arbitrate]).await;
    let (mut watcher, _) = register(&handle, "watcher", &[]).await;

    watcher.send(subscribe_envelope("watcher", SubscriptionFilter::default()));
    recv_type(&mut watcher, MessageType::SubscribeAck).await;

    let update = |agent: &str, content: &str| {
        Envelope::new(
            agent,
            MessageType::MemoryUpdated,
            &MemoryEventPayload {
                memory_id: Some("M9".to_string()),
                content: Some(content.to_string()),
                ..Default::default()
            },
        )
    };
    conn_a.send(update("A", "va"));
    conn_b.send(update("B", "vb"));
    let detected: ConflictDetectedPayload = recv_type(&mut conn_a, MessageType::ConflictDetected)
        .await
        .parse_payload()
        .unwrap();

    // A writer without arbitrate cannot resolve
    conn_a.send(Envelope::new(
        "A",
        MessageType::ConflictResolution,
        &ConflictResolutionPayload {
            conflict_id: detected.conflict_id.clone(),
            memory_id: "M9".to_string(),
            strategy: ConflictStrategy::LastWriteWins,
            resolved_content: None,
        },
    ));
    let error: ErrorPayload = recv_type(&mut conn_a, MessageType::Error)
        .await
        .parse_payload()
        .unwrap();
    assert_eq!(error.code, ErrorCode::InvalidCapability);

    // The arbiter can; subscribers observe the resolution
    arbiter.send(Envelope::new(
        "judge",
        MessageType::ConflictResolution,
        &ConflictResolutionPayload {
            conflict_id: detected.conflict_id,
            memory_id: "M9".to_string(),
            strategy: ConflictStrategy::LastWriteWins,
            resolved_content: Some("vb".to_string()),
        },
    ));
    let broadcast = recv_type(&mut watcher, MessageType::ConflictResolution).await;
    assert_eq!(broadcast.sender, "judge");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut writer, _) = register(&handle, "writer", &[Capability::MemoryWrite]).await;
    let (mut listener, _) = register(&handle, "listener", &[]).await;

    listener.send(subscribe_envelope("listener", SubscriptionFilter::default()));
    let ack = recv_type(&mut listener, MessageType::SubscribeAck).await;
    let subscription_id = ack.payload["subscriptionId"]
        .as_str()
        .expect("subscription id")
        .to_string();

    listener.send(Envelope::new(
        "listener",
        MessageType::Unsubscribe,
        &serde_json::json!({ "subscriptionId": subscription_id }),
    ));
    recv_type(&mut listener, MessageType::UnsubscribeAck).await;

    writer.send(Envelope::new(
        "writer",
        MessageType::MemoryUpdated,
        &MemoryEventPayload {
            memory_id: Some("M2".to_string()),
            content: Some("silent".to_string()),
            ..Default::default()
        },
    ));

    // Nothing arrives for the unsubscribed listener
    let silence =
        tokio::time::timeout(std::time::Duration::from_millis(300), listener.recv()).await;
    assert!(silence.is_err(), "listener should hear nothing");
}

#[tokio::test]
async fn conflict_detection_notifies_both_writers() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::MemoryWrite]).await;
    let (mut conn_b, _) = register(&handle, "B", &[Capability::MemoryWrite]).await;

    let update = |agent: &str, content: &str| {
        Envelope::new(
            agent,
            MessageType::MemoryUpdated,
            &MemoryEventPayload {
                memory_id: Some("M9".to_string()),
                content: Some(content.to_string()),
                ..Default::default()
            },
        )
    };
    conn_a.send(update("A", "version from A"));
    conn_b.send(update("B", "version from B"));

    let detected_a: ConflictDetectedPayload = recv_type(&mut conn_a, MessageType::ConflictDetected)
        .await
        .parse_payload()
        .unwrap();
    let detected_b: ConflictDetectedPayload = recv_type(&mut conn_b, MessageType::ConflictDetected)
        .await
        .parse_payload()
        .unwrap();

    assert_eq!(detected_a.memory_id, "M9");
    assert_eq!(detected_a.conflicting_agents, vec!["A", "B"]);
    assert_eq!(detected_a.suggested_strategy, ConflictStrategy::LastWriteWins);
    assert_eq!(detected_a.conflict_id, detected_b.conflict_id);
    assert_eq!(detected_a.writes.len(), 2);
}

#[tokio::test]
async fn subscriptions_filter_and_fan_out() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[Capability::MemoryWrite]).await;
    let (mut conn_b, _) = register(&handle, "B", &[]).await;

    // B only wants memory.updated events
    conn_b.send(subscribe_envelope(
        "B",
        SubscriptionFilter {
            event_types: vec!["memory.updated".to_string()],
            ..Default::default()
        },
    ));
    recv_type(&mut conn_b, MessageType::SubscribeAck).await;

    // A relays a recalled event: filtered out for B
    conn_a.send(Envelope::new(
        "A",
        MessageType::MemoryRecalled,
        &MemoryEventPayload {
            query: Some("anything".to_string()),
            ..Default::default()
        },
    ));
    // Then an update: B must receive exactly that one
    conn_a.send(Envelope::new(
        "A",
        MessageType::MemoryUpdated,
        &MemoryEventPayload {
            memory_id: Some("M5".to_string()),
            content: Some("new value".to_string()),
            ..Default::default()
        },
    ));

    let received = recv_type(&mut conn_b, MessageType::MemoryUpdated).await;
    assert_eq!(received.sender, "A");
    let payload: MemoryEventPayload = received.parse_payload().unwrap();
    assert_eq!(payload.memory_id.as_deref(), Some("M5"));
}

#[tokio::test]
async fn engine_events_reach_subscribers() {
    let engine = Arc::new(MemoryEngine::ephemeral());
    let (handle, _task) = spawn_actor(fast_config(), Some(engine.clone()));

    let (mut conn, _) = register(&handle, "watcher", &[]).await;
    conn.send(subscribe_envelope("watcher", SubscriptionFilter::default()));
    recv_type(&mut conn, MessageType::SubscribeAck).await;

    engine
        .add(AddInput::content("The build number is 421"))
        .await
        .unwrap();

    let event = recv_type(&mut conn, MessageType::MemoryAdded).await;
    assert_eq!(event.sender, "server");
    let payload: MemoryEventPayload = event.parse_payload().unwrap();
    assert!(payload.content.unwrap().contains("build number"));
}

#[tokio::test]
async fn first_message_must_be_register() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let mut conn = handle.connect().await.unwrap();

    conn.send(Envelope::new(
        "ghost",
        MessageType::AgentHeartbeat,
        &serde_json::json!({}),
    ));
    let error = recv_type(&mut conn, MessageType::Error).await;
    let payload: ErrorPayload = error.parse_payload().unwrap();
    assert_eq!(payload.code, ErrorCode::AgentNotRegistered);

    // The connection is closed afterwards
    assert!(conn.recv().await.is_none());
}

#[tokio::test]
async fn register_at_capacity_yields_rate_limited() {
    let config = CoordConfig {
        max_agents: 1,
        ..fast_config()
    };
    let (handle, _task) = spawn_actor(config, None);
    let (_conn_a, _) = register(&handle, "A", &[]).await;

    let mut conn_b = handle.connect().await.unwrap();
    conn_b.send(register_envelope("B", &[]));
    let error = recv_type(&mut conn_b, MessageType::Error).await;
    let payload: ErrorPayload = error.parse_payload().unwrap();
    assert_eq!(payload.code, ErrorCode::RateLimited);
    assert!(payload.recoverable);
}

#[tokio::test]
async fn resume_token_reclaims_identity() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut old_conn, registered) = register(&handle, "A", &[Capability::Coordinate]).await;

    // A second connection resumes with the token under a different id
    let mut new_conn = handle.connect().await.unwrap();
    new_conn.send(Envelope::new(
        "whatever",
        MessageType::AgentRegister,
        &RegisterPayload {
            agent_id: Some("other".to_string()),
            name: "reconnecting".to_string(),
            agent_type: Default::default(),
            capabilities: vec![Capability::Coordinate],
            resume_token: Some(registered.resume_token.clone()),
        },
    ));
    let reply = recv_type(&mut new_conn, MessageType::AgentRegistered).await;
    let payload: engram_coord::RegisteredPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.agent_id, "A");
    assert_ne!(payload.resume_token, registered.resume_token);

    // The old connection was superseded and closed
    let superseded = recv_type(&mut old_conn, MessageType::AgentDisconnect).await;
    let reason: DisconnectPayload = superseded.parse_payload().unwrap();
    assert_eq!(reason.reason, DisconnectReason::Superseded);
    assert!(old_conn.recv().await.is_none());
}

#[tokio::test]
async fn shutdown_notifies_every_agent() {
    let (handle, _task) = spawn_actor(fast_config(), None);
    let (mut conn_a, _) = register(&handle, "A", &[]).await;
    let (mut conn_b, _) = register(&handle, "B", &[]).await;

    handle.shutdown().await;

    for conn in [&mut conn_a, &mut conn_b] {
        let notice = recv_type(conn, MessageType::AgentDisconnect).await;
        let payload: DisconnectPayload = notice.parse_payload().unwrap();
        assert_eq!(payload.reason, DisconnectReason::Shutdown);
    }
}
