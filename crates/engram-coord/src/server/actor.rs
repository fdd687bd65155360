//! The coordination actor.
//!
//! All coordination state (registry, locks, subscriptions, pending
//! writes) is owned by one task consuming a command channel, so no
//! observable interleaving of two state mutations exists. Connections,
//! heartbeat timers, lock-expiry timers and the conflict-window sweeps
//! all re-enter the actor through the same channel, which also gives
//! every agent a total order over its messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engram_core::{AddInput, MemoryEngine, MemoryEvent, MemoryLayer};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::conflicts::ConflictTracker;
use super::locks::{LockRequestOutcome, LockTable, ReleaseError};
use super::registry::{RegisterOutcome, Registry};
use super::subscriptions::{EventMeta, SubscriptionTable};
use crate::config::CoordConfig;
use crate::protocol::{
    ConflictResolutionPayload, Capability, DisconnectPayload, DisconnectReason, Envelope,
    ErrorCode, ErrorPayload, HeartbeatAckPayload, ListResponsePayload, LockDeniedPayload,
    LockDeniedReason, LockGrantedPayload, LockReleasePayload, LockReleasedPayload,
    LockRequestPayload, MemoryEventPayload, MessageType, RegisterPayload, RegisteredPayload,
    SubscribeAckPayload, SubscribePayload, SubscriptionFilter, UnsubscribeAckPayload,
    UnsubscribePayload,
};

/// Sender name the server uses in envelopes it originates.
const SERVER_SENDER: &str = "server";

// ============================================================================
// COMMANDS
// ============================================================================

/// Everything that can re-enter the actor.
pub enum Command {
    /// A new connection wants in; replies with its connection id
    Attach {
        /// Channel the actor sends outbound envelopes through
        outbound: mpsc::UnboundedSender<Envelope>,
        /// Receives the allocated connection id
        reply: oneshot::Sender<u64>,
    },
    /// A decoded frame arrived on a connection
    Inbound {
        /// Source connection
        conn_id: u64,
        /// The decoded envelope
        envelope: Envelope,
    },
    /// The transport closed a connection
    ConnectionClosed {
        /// The closed connection
        conn_id: u64,
    },
    /// A heartbeat deadline fired
    HeartbeatTimeout {
        /// The idle agent
        agent_id: String,
        /// Timer generation; stale timers are ignored
        generation: u64,
    },
    /// A lock's expiry fired
    LockExpired {
        /// The expired lock
        lock_id: String,
    },
    /// A conflict-window sweep is due
    ConflictSweep {
        /// Memory whose pending writes should be pruned
        memory_id: String,
    },
    /// The engine emitted a memory event
    EngineEvent(MemoryEvent),
    /// Orderly shutdown
    Shutdown {
        /// Signalled once every agent was notified
        reply: Option<oneshot::Sender<()>>,
    },
}

// ============================================================================
// CLIENT HANDLE
// ============================================================================

/// Handle for attaching connections and stopping the actor.
#[derive(Clone)]
pub struct CoordHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl CoordHandle {
    /// Attach a new (unregistered) connection.
    pub async fn connect(&self) -> Option<ClientConn> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Attach {
                outbound: outbound_tx,
                reply: reply_tx,
            })
            .ok()?;
        let conn_id = reply_rx.await.ok()?;
        Some(ClientConn {
            conn_id,
            cmd_tx: self.cmd_tx.clone(),
            outbound: outbound_rx,
        })
    }

    /// Raw command sender, for timers and the engine pump.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.cmd_tx.clone()
    }

    /// Orderly shutdown: every agent gets `agent.disconnect(shutdown)`.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Shutdown {
                reply: Some(reply_tx),
            })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// One attached connection, as seen by the transport (or a test).
pub struct ClientConn {
    conn_id: u64,
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Envelopes the server sends to this connection
    pub outbound: mpsc::UnboundedReceiver<Envelope>,
}

impl ClientConn {
    /// This connection's id.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Deliver a decoded frame to the actor.
    pub fn send(&self, envelope: Envelope) {
        let _ = self.cmd_tx.send(Command::Inbound {
            conn_id: self.conn_id,
            envelope,
        });
    }

    /// Await the next outbound envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.outbound.recv().await
    }

    /// Announce the transport closed.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::ConnectionClosed {
            conn_id: self.conn_id,
        });
    }
}

// ============================================================================
// ACTOR
// ============================================================================

struct ConnectionState {
    outbound: mpsc::UnboundedSender<Envelope>,
    agent_id: Option<String>,
}

/// Spawn the actor; returns its handle and task.
pub fn spawn_actor(
    config: CoordConfig,
    engine: Option<Arc<MemoryEngine>>,
) -> (CoordHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    // Pump engine events into the actor so fan-out happens post-commit,
    // in source order.
    if let Some(engine) = &engine {
        let mut events = engine.subscribe();
        let pump_tx = cmd_tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if pump_tx.send(Command::EngineEvent(event)).is_err() {
                    break;
                }
            }
        });
    }

    let actor = Actor {
        locks: LockTable::new(config.max_wait_queue, config.lock_expiry_ms),
        registry: Registry::new(config.max_agents),
        conflicts: ConflictTracker::new(
            config.conflict_window_ms,
            config.default_conflict_strategy,
        ),
        config,
        engine,
        cmd_tx: cmd_tx.clone(),
        connections: HashMap::new(),
        agent_conns: HashMap::new(),
        subscriptions: SubscriptionTable::new(),
        heartbeat_timers: HashMap::new(),
        lock_timers: HashMap::new(),
        next_conn_id: 1,
    };
    let task = tokio::spawn(actor.run(cmd_rx));
    (CoordHandle { cmd_tx }, task)
}

struct Actor {
    config: CoordConfig,
    engine: Option<Arc<MemoryEngine>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    connections: HashMap<u64, ConnectionState>,
    /// agent id → live connection id
    agent_conns: HashMap<String, u64>,
    registry: Registry,
    locks: LockTable,
    subscriptions: SubscriptionTable,
    conflicts: ConflictTracker,
    /// agent id → (generation, timer task)
    heartbeat_timers: HashMap<String, (u64, JoinHandle<()>)>,
    /// lock id → expiry task
    lock_timers: HashMap<String, JoinHandle<()>>,
    next_conn_id: u64,
}

impl Actor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        info!("coordination actor started");
        while let Some(command) = cmd_rx.recv().await {
            match command {
                Command::Attach { outbound, reply } => {
                    let conn_id = self.next_conn_id;
                    self.next_conn_id += 1;
                    self.connections.insert(
                        conn_id,
                        ConnectionState {
                            outbound,
                            agent_id: None,
                        },
                    );
                    let _ = reply.send(conn_id);
                    debug!(conn_id, "connection attached");
                }
                Command::Inbound { conn_id, envelope } => {
                    self.handle_inbound(conn_id, envelope).await;
                }
                Command::ConnectionClosed { conn_id } => {
                    if let Some(state) = self.connections.remove(&conn_id) {
                        if let Some(agent_id) = state.agent_id {
                            debug!(conn_id, %agent_id, "transport closed, cleaning agent");
                            self.disconnect_agent(&agent_id, DisconnectReason::Error, false);
                        }
                    }
                }
                Command::HeartbeatTimeout {
                    agent_id,
                    generation,
                } => {
                    let current = self.heartbeat_timers.get(&agent_id).map(|(g, _)| *g);
                    if current == Some(generation) {
                        info!(%agent_id, "heartbeat timeout");
                        self.disconnect_agent(&agent_id, DisconnectReason::Timeout, true);
                    }
                }
                Command::LockExpired { lock_id } => {
                    self.lock_timers.remove(&lock_id);
                    if let Some((resource, holder)) = self.locks.expire(&lock_id) {
                        debug!(%lock_id, agent_id = %holder.agent_id, "lock expired");
                        self.send_to_agent(
                            &holder.agent_id,
                            Envelope::new(
                                SERVER_SENDER,
                                MessageType::LockReleased,
                                &LockReleasedPayload {
                                    lock_id: lock_id.clone(),
                                    resource: resource.clone(),
                                },
                            ),
                        );
                        self.drain_resource(&resource);
                    }
                }
                Command::ConflictSweep { memory_id } => {
                    self.conflicts.sweep(&memory_id, Utc::now());
                }
                Command::EngineEvent(event) => {
                    self.fan_out_engine_event(&event);
                }
                Command::Shutdown { reply } => {
                    self.shutdown();
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
            }
        }
        info!("coordination actor stopped");
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn handle_inbound(&mut self, conn_id: u64, envelope: Envelope) {
        let Some(state) = self.connections.get(&conn_id) else {
            return;
        };

        // The first message on a connection must be agent.register.
        if state.agent_id.is_none() && envelope.msg_type != MessageType::AgentRegister {
            self.send_error(
                conn_id,
                ErrorCode::AgentNotRegistered,
                "register before sending anything else",
                Some(&envelope.id),
            );
            self.close_connection(conn_id);
            return;
        }

        match envelope.msg_type {
            MessageType::AgentRegister => self.handle_register(conn_id, &envelope),
            MessageType::AgentHeartbeat => self.handle_heartbeat(conn_id, &envelope),
            MessageType::AgentDisconnect => {
                if let Some(agent_id) = self.agent_for(conn_id) {
                    self.disconnect_agent(&agent_id, DisconnectReason::Explicit, false);
                }
            }
            MessageType::AgentList => self.handle_list(conn_id, &envelope),
            MessageType::LockRequest => self.handle_lock_request(conn_id, &envelope),
            MessageType::LockRelease => self.handle_lock_release(conn_id, &envelope),
            MessageType::Subscribe => self.handle_subscribe(conn_id, &envelope),
            MessageType::Unsubscribe => self.handle_unsubscribe(conn_id, &envelope),
            MessageType::MemoryAdded
            | MessageType::MemoryUpdated
            | MessageType::MemoryDeleted
            | MessageType::MemoryRecalled => self.handle_memory_event(conn_id, envelope).await,
            MessageType::ConflictResolution => self.handle_conflict_resolution(conn_id, &envelope),
            // Server-originated types are not valid from a client.
            MessageType::AgentRegistered
            | MessageType::AgentHeartbeatAck
            | MessageType::AgentListResponse
            | MessageType::LockGranted
            | MessageType::LockDenied
            | MessageType::LockReleased
            | MessageType::ConflictDetected
            | MessageType::SubscribeAck
            | MessageType::UnsubscribeAck
            | MessageType::Error => {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidMessage,
                    format!("{} is server-originated", envelope.msg_type),
                    Some(&envelope.id),
                );
                self.close_connection(conn_id);
            }
        }
    }

    fn agent_for(&self, conn_id: u64) -> Option<String> {
        self.connections
            .get(&conn_id)
            .and_then(|s| s.agent_id.clone())
    }

    // ------------------------------------------------------------------
    // Registration & heartbeats
    // ------------------------------------------------------------------

    fn handle_register(&mut self, conn_id: u64, envelope: &Envelope) {
        let payload: RegisterPayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidMessage,
                    e.to_string(),
                    Some(&envelope.id),
                );
                self.close_connection(conn_id);
                return;
            }
        };

        match self.registry.register(&payload, Utc::now()) {
            RegisterOutcome::AtCapacity => {
                self.send_error(
                    conn_id,
                    ErrorCode::RateLimited,
                    "server is at max agents",
                    Some(&envelope.id),
                );
            }
            RegisterOutcome::Registered {
                agent_id,
                resume_token,
                superseded,
                resumed,
            } => {
                // Last-writer-wins identity: close any prior live
                // connection owned by this agent id.
                if superseded {
                    if let Some(old_conn) = self.agent_conns.get(&agent_id).copied() {
                        if old_conn != conn_id {
                            self.send_to_conn(
                                old_conn,
                                Envelope::new(
                                    SERVER_SENDER,
                                    MessageType::AgentDisconnect,
                                    &DisconnectPayload {
                                        reason: DisconnectReason::Superseded,
                                    },
                                ),
                            );
                            if let Some(old_state) = self.connections.get_mut(&old_conn) {
                                old_state.agent_id = None;
                            }
                            self.close_connection(old_conn);
                        }
                    }
                }

                self.agent_conns.insert(agent_id.clone(), conn_id);
                if let Some(state) = self.connections.get_mut(&conn_id) {
                    state.agent_id = Some(agent_id.clone());
                }
                self.arm_heartbeat(&agent_id);

                info!(%agent_id, resumed, superseded, "agent registered");
                self.send_to_conn(
                    conn_id,
                    Envelope::new(
                        SERVER_SENDER,
                        MessageType::AgentRegistered,
                        &RegisteredPayload {
                            agent_id,
                            resume_token,
                            heartbeat_interval_ms: self.config.heartbeat_interval_ms,
                            heartbeat_timeout_ms: self.config.heartbeat_timeout_ms,
                        },
                    )
                    .correlated(envelope.id.clone()),
                );
            }
        }
    }

    fn handle_heartbeat(&mut self, conn_id: u64, envelope: &Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };
        if self.registry.heartbeat(&agent_id, Utc::now()) {
            self.arm_heartbeat(&agent_id);
            self.send_to_conn(
                conn_id,
                Envelope::new(
                    SERVER_SENDER,
                    MessageType::AgentHeartbeatAck,
                    &HeartbeatAckPayload {
                        server_time: Utc::now(),
                    },
                )
                .correlated(envelope.id.clone()),
            );
        }
    }

    fn handle_list(&mut self, conn_id: u64, envelope: &Envelope) {
        let agents = self.registry.list();
        self.send_to_conn(
            conn_id,
            Envelope::new(
                SERVER_SENDER,
                MessageType::AgentListResponse,
                &ListResponsePayload { agents },
            )
            .correlated(envelope.id.clone()),
        );
    }

    fn arm_heartbeat(&mut self, agent_id: &str) {
        let generation = self
            .heartbeat_timers
            .get(agent_id)
            .map(|(g, _)| g + 1)
            .unwrap_or(1);
        if let Some((_, old)) = self.heartbeat_timers.remove(agent_id) {
            old.abort();
        }
        let timeout = Duration::from_millis(self.config.heartbeat_timeout_ms);
        let cmd_tx = self.cmd_tx.clone();
        let agent = agent_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = cmd_tx.send(Command::HeartbeatTimeout {
                agent_id: agent,
                generation,
            });
        });
        self.heartbeat_timers
            .insert(agent_id.to_string(), (generation, handle));
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    fn handle_lock_request(&mut self, conn_id: u64, envelope: &Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };
        if !self.registry.has_capability(&agent_id, Capability::Coordinate) {
            self.send_error(
                conn_id,
                ErrorCode::InvalidCapability,
                "lock operations require the coordinate capability",
                Some(&envelope.id),
            );
            return;
        }
        let payload: LockRequestPayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidMessage,
                    e.to_string(),
                    Some(&envelope.id),
                );
                self.close_connection(conn_id);
                return;
            }
        };

        let outcome = self.locks.request(
            payload.resource.clone(),
            &agent_id,
            payload.mode,
            &envelope.id,
            payload.timeout_ms,
            Utc::now(),
        );
        match outcome {
            LockRequestOutcome::Granted(holder) => {
                debug!(%agent_id, resource = %payload.resource, lock_id = %holder.lock_id, "lock granted");
                self.arm_lock_timer(&holder.lock_id, holder.expires_at);
                self.send_to_conn(
                    conn_id,
                    Envelope::new(
                        SERVER_SENDER,
                        MessageType::LockGranted,
                        &LockGrantedPayload {
                            lock_id: holder.lock_id,
                            resource: payload.resource,
                            mode: holder.mode,
                            expires_at: holder.expires_at,
                        },
                    )
                    .correlated(envelope.id.clone()),
                );
            }
            LockRequestOutcome::Enqueued { position } => {
                self.send_to_conn(
                    conn_id,
                    Envelope::new(
                        SERVER_SENDER,
                        MessageType::LockDenied,
                        &LockDeniedPayload {
                            resource: payload.resource,
                            reason: LockDeniedReason::AlreadyLocked,
                            wait_queue_position: Some(position),
                        },
                    )
                    .correlated(envelope.id.clone()),
                );
            }
            LockRequestOutcome::QueueFull => {
                self.send_to_conn(
                    conn_id,
                    Envelope::new(
                        SERVER_SENDER,
                        MessageType::LockDenied,
                        &LockDeniedPayload {
                            resource: payload.resource,
                            reason: LockDeniedReason::QueueFull,
                            wait_queue_position: None,
                        },
                    )
                    .correlated(envelope.id.clone()),
                );
            }
        }
    }

    fn handle_lock_release(&mut self, conn_id: u64, envelope: &Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };
        let payload: LockReleasePayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidMessage,
                    e.to_string(),
                    Some(&envelope.id),
                );
                self.close_connection(conn_id);
                return;
            }
        };

        match self.locks.release(&payload.lock_id, &agent_id) {
            Ok(resource) => {
                self.cancel_lock_timer(&payload.lock_id);
                self.send_to_conn(
                    conn_id,
                    Envelope::new(
                        SERVER_SENDER,
                        MessageType::LockReleased,
                        &LockReleasedPayload {
                            lock_id: payload.lock_id,
                            resource: resource.clone(),
                        },
                    )
                    .correlated(envelope.id.clone()),
                );
                self.drain_resource(&resource);
            }
            Err(ReleaseError::NotFound) => {
                self.send_error(
                    conn_id,
                    ErrorCode::NotFound,
                    format!("no such lock: {}", payload.lock_id),
                    Some(&envelope.id),
                );
            }
            Err(ReleaseError::NotHolder) => {
                self.send_error(
                    conn_id,
                    ErrorCode::LockFailed,
                    "only the holder may release a lock",
                    Some(&envelope.id),
                );
            }
        }
    }

    fn arm_lock_timer(&mut self, lock_id: &str, expires_at: chrono::DateTime<Utc>) {
        let delay = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_millis(0));
        let cmd_tx = self.cmd_tx.clone();
        let lock = lock_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = cmd_tx.send(Command::LockExpired { lock_id: lock });
        });
        if let Some(old) = self.lock_timers.insert(lock_id.to_string(), handle) {
            old.abort();
        }
    }

    fn cancel_lock_timer(&mut self, lock_id: &str) {
        if let Some(handle) = self.lock_timers.remove(lock_id) {
            handle.abort();
        }
    }

    /// Hand a freed resource to its FIFO waiters.
    fn drain_resource(&mut self, resource: &crate::protocol::LockResource) {
        let connected: std::collections::HashSet<String> =
            self.agent_conns.keys().cloned().collect();
        let granted = self
            .locks
            .drain(resource, Utc::now(), |agent| connected.contains(agent));
        for (holder, waiter) in granted {
            debug!(
                agent_id = %holder.agent_id,
                lock_id = %holder.lock_id,
                "queued lock granted"
            );
            self.arm_lock_timer(&holder.lock_id, holder.expires_at);
            self.send_to_agent(
                &holder.agent_id,
                Envelope::new(
                    SERVER_SENDER,
                    MessageType::LockGranted,
                    &LockGrantedPayload {
                        lock_id: holder.lock_id.clone(),
                        resource: resource.clone(),
                        mode: holder.mode,
                        expires_at: holder.expires_at,
                    },
                )
                .correlated(waiter.request_id.clone()),
            );
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions & fan-out
    // ------------------------------------------------------------------

    fn handle_subscribe(&mut self, conn_id: u64, envelope: &Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };
        let payload: SubscribePayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(_) => SubscribePayload {
                filter: SubscriptionFilter::default(),
            },
        };
        let subscription_id = self.subscriptions.add(&agent_id, payload.filter);
        self.send_to_conn(
            conn_id,
            Envelope::new(
                SERVER_SENDER,
                MessageType::SubscribeAck,
                &SubscribeAckPayload { subscription_id },
            )
            .correlated(envelope.id.clone()),
        );
    }

    fn handle_unsubscribe(&mut self, conn_id: u64, envelope: &Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };
        let payload: UnsubscribePayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidMessage,
                    e.to_string(),
                    Some(&envelope.id),
                );
                self.close_connection(conn_id);
                return;
            }
        };
        if self.subscriptions.remove(&payload.subscription_id, &agent_id) {
            self.send_to_conn(
                conn_id,
                Envelope::new(
                    SERVER_SENDER,
                    MessageType::UnsubscribeAck,
                    &UnsubscribeAckPayload {
                        subscription_id: payload.subscription_id,
                    },
                )
                .correlated(envelope.id.clone()),
            );
        } else {
            self.send_error(
                conn_id,
                ErrorCode::NotFound,
                format!("no such subscription: {}", payload.subscription_id),
                Some(&envelope.id),
            );
        }
    }

    /// Forward an envelope to every subscriber whose filter matches.
    fn fan_out(&mut self, envelope: &Envelope, meta: &EventMeta<'_>) {
        let recipients = self.subscriptions.recipients(meta);
        for agent_id in recipients {
            self.send_to_agent(&agent_id, envelope.clone());
        }
    }

    fn fan_out_engine_event(&mut self, event: &MemoryEvent) {
        let msg_type = match event {
            MemoryEvent::Added { .. } => MessageType::MemoryAdded,
            MemoryEvent::Updated { .. } => MessageType::MemoryUpdated,
            MemoryEvent::Deleted { .. } | MemoryEvent::Pruned { .. } => MessageType::MemoryDeleted,
            MemoryEvent::Recalled { .. } => MessageType::MemoryRecalled,
        };

        let payload = match event {
            MemoryEvent::Added {
                id,
                layer,
                content_preview,
                project_id,
                tags,
                ..
            } => MemoryEventPayload {
                memory_id: Some(id.clone()),
                content: Some(content_preview.clone()),
                layer: Some(layer.as_str().to_string()),
                project_id: project_id.clone(),
                tags: tags.clone(),
                ..Default::default()
            },
            MemoryEvent::Updated { id, layer, .. } | MemoryEvent::Deleted { id, layer, .. } => {
                MemoryEventPayload {
                    memory_id: Some(id.clone()),
                    layer: Some(layer.as_str().to_string()),
                    ..Default::default()
                }
            }
            MemoryEvent::Pruned { layer, .. } => MemoryEventPayload {
                layer: Some(layer.as_str().to_string()),
                ..Default::default()
            },
            MemoryEvent::Recalled {
                query, result_ids, ..
            } => MemoryEventPayload {
                query: Some(query.clone()),
                result_ids: result_ids.clone(),
                ..Default::default()
            },
        };

        let envelope = Envelope::new(SERVER_SENDER, msg_type, &payload);
        let layer = payload.layer.clone();
        let meta = EventMeta {
            event_type: msg_type.as_str(),
            layer: layer.as_deref(),
            project_id: payload.project_id.as_deref(),
            tags: &payload.tags,
            sender: SERVER_SENDER,
        };
        self.fan_out(&envelope, &meta);
    }

    // ------------------------------------------------------------------
    // Memory events from agents
    // ------------------------------------------------------------------

    async fn handle_memory_event(&mut self, conn_id: u64, envelope: Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };

        let required = match envelope.msg_type {
            MessageType::MemoryAdded | MessageType::MemoryUpdated => Some(Capability::MemoryWrite),
            MessageType::MemoryDeleted => Some(Capability::MemoryDelete),
            _ => None,
        };
        if let Some(capability) = required {
            if !self.registry.has_capability(&agent_id, capability) {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidCapability,
                    format!("{} requires {:?}", envelope.msg_type, capability),
                    Some(&envelope.id),
                );
                return;
            }
        }

        let payload: MemoryEventPayload = envelope.parse_payload().unwrap_or_default();

        // Writes go through the engine; the server gates them.
        match envelope.msg_type {
            MessageType::MemoryAdded => {
                if let (Some(engine), Some(content)) = (&self.engine, payload.content.clone()) {
                    let input = AddInput {
                        content,
                        layer: payload.layer.as_deref().and_then(MemoryLayer::parse_name),
                        tags: payload.tags.clone(),
                        project_id: payload.project_id.clone(),
                        session_id: None,
                        source: Default::default(),
                    };
                    if let Err(e) = engine.add(input).await {
                        warn!(%agent_id, "gated add failed: {e}");
                    }
                }
            }
            MessageType::MemoryUpdated => {
                if let Some(memory_id) = payload.memory_id.clone() {
                    let content = payload.content.clone().unwrap_or_default();
                    if let Some(conflict) =
                        self.conflicts
                            .record(&memory_id, &agent_id, &content, Utc::now())
                    {
                        info!(
                            %memory_id,
                            participants = conflict.conflicting_agents.len(),
                            "conflict detected"
                        );
                        let notice = Envelope::new(
                            SERVER_SENDER,
                            MessageType::ConflictDetected,
                            &conflict,
                        );
                        for participant in &conflict.conflicting_agents {
                            self.send_to_agent(participant, notice.clone());
                        }
                    }
                    self.schedule_conflict_sweep(&memory_id);
                }
            }
            MessageType::MemoryDeleted => {
                if let (Some(engine), Some(memory_id)) = (&self.engine, payload.memory_id.clone())
                {
                    match engine.delete(&memory_id).await {
                        Ok(false) => {
                            self.send_error(
                                conn_id,
                                ErrorCode::NotFound,
                                format!("no such memory: {memory_id}"),
                                Some(&envelope.id),
                            );
                        }
                        Ok(true) => {}
                        Err(e) => warn!(%agent_id, "gated delete failed: {e}"),
                    }
                }
            }
            // Client-relayed recalls are forwarded, never re-applied.
            MessageType::MemoryRecalled => {}
            _ => {}
        }

        let meta = EventMeta {
            event_type: envelope.msg_type.as_str(),
            layer: payload.layer.as_deref(),
            project_id: payload.project_id.as_deref(),
            tags: &payload.tags,
            sender: &envelope.sender,
        };
        self.fan_out(&envelope, &meta);
    }

    fn schedule_conflict_sweep(&self, memory_id: &str) {
        let window = Duration::from_millis(self.config.conflict_window_ms);
        let cmd_tx = self.cmd_tx.clone();
        let memory = memory_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = cmd_tx.send(Command::ConflictSweep { memory_id: memory });
        });
    }

    fn handle_conflict_resolution(&mut self, conn_id: u64, envelope: &Envelope) {
        let Some(agent_id) = self.agent_for(conn_id) else {
            return;
        };
        if !self.registry.has_capability(&agent_id, Capability::Arbitrate) {
            self.send_error(
                conn_id,
                ErrorCode::InvalidCapability,
                "conflict resolution requires the arbitrate capability",
                Some(&envelope.id),
            );
            return;
        }
        let payload: ConflictResolutionPayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.send_error(
                    conn_id,
                    ErrorCode::InvalidMessage,
                    e.to_string(),
                    Some(&envelope.id),
                );
                self.close_connection(conn_id);
                return;
            }
        };

        self.conflicts.resolve(&payload.memory_id);
        info!(memory_id = %payload.memory_id, "conflict resolved");

        let meta = EventMeta {
            event_type: MessageType::ConflictResolution.as_str(),
            sender: &envelope.sender,
            ..Default::default()
        };
        let broadcast = envelope.clone();
        self.fan_out(&broadcast, &meta);
    }

    // ------------------------------------------------------------------
    // Disconnect & shutdown
    // ------------------------------------------------------------------

    /// Tear an agent down: notify (optionally), release its locks,
    /// scrub its subscriptions, destroy the record, drop the connection.
    fn disconnect_agent(&mut self, agent_id: &str, reason: DisconnectReason, notify: bool) {
        if notify {
            self.send_to_agent(
                agent_id,
                Envelope::new(
                    SERVER_SENDER,
                    MessageType::AgentDisconnect,
                    &DisconnectPayload { reason },
                ),
            );
        }

        if let Some((_, handle)) = self.heartbeat_timers.remove(agent_id) {
            handle.abort();
        }

        // Release everything the agent held; each freed resource drains.
        let live_before = self.locks.lock_ids();
        let affected = self.locks.remove_agent(agent_id);
        let live_after: std::collections::HashSet<String> =
            self.locks.lock_ids().into_iter().collect();
        for lock_id in live_before {
            if !live_after.contains(&lock_id) {
                self.cancel_lock_timer(&lock_id);
            }
        }

        self.subscriptions.remove_agent(agent_id);
        self.registry.remove(agent_id);

        if let Some(conn_id) = self.agent_conns.remove(agent_id) {
            if let Some(state) = self.connections.get_mut(&conn_id) {
                state.agent_id = None;
            }
            self.close_connection(conn_id);
        }

        for resource in affected {
            self.drain_resource(&resource);
        }
        info!(agent_id, ?reason, "agent disconnected");
    }

    fn shutdown(&mut self) {
        info!("coordination server shutting down");
        for agent_id in self.registry.agent_ids() {
            self.send_to_agent(
                &agent_id,
                Envelope::new(
                    SERVER_SENDER,
                    MessageType::AgentDisconnect,
                    &DisconnectPayload {
                        reason: DisconnectReason::Shutdown,
                    },
                ),
            );
        }
        for (_, (_, handle)) in self.heartbeat_timers.drain() {
            handle.abort();
        }
        for (_, handle) in self.lock_timers.drain() {
            handle.abort();
        }
        self.connections.clear();
        self.agent_conns.clear();
    }

    // ------------------------------------------------------------------
    // Send helpers
    // ------------------------------------------------------------------

    fn send_to_conn(&self, conn_id: u64, envelope: Envelope) {
        if let Some(state) = self.connections.get(&conn_id) {
            let _ = state.outbound.send(envelope);
        }
    }

    fn send_to_agent(&self, agent_id: &str, envelope: Envelope) {
        if let Some(conn_id) = self.agent_conns.get(agent_id) {
            self.send_to_conn(*conn_id, envelope);
        }
    }

    fn send_error(
        &self,
        conn_id: u64,
        code: ErrorCode,
        message: impl Into<String>,
        correlation_id: Option<&str>,
    ) {
        let mut envelope = Envelope::new(
            SERVER_SENDER,
            MessageType::Error,
            &ErrorPayload::new(code, message),
        );
        if let Some(correlation) = correlation_id {
            envelope = envelope.correlated(correlation.to_string());
        }
        self.send_to_conn(conn_id, envelope);
    }

    /// Drop a connection; the transport observes the closed channel.
    fn close_connection(&mut self, conn_id: u64) {
        if let Some(state) = self.connections.remove(&conn_id) {
            if let Some(agent_id) = state.agent_id {
                self.agent_conns.remove(&agent_id);
            }
        }
    }
}
