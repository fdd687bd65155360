//! The Agent Coordination Server.
//!
//! A single-process server owning all coordination state: agent
//! registry, lock table with FIFO wait queues and expiry, filtered
//! subscriptions, and concurrent-write conflict detection. The memory
//! engine's events are forwarded into the subscription fan-out, and
//! agent memory writes are gated through the engine.

mod actor;
mod conflicts;
mod connection;
mod locks;
mod registry;
mod subscriptions;

pub use actor::{ClientConn, Command, CoordHandle, spawn_actor};
pub use conflicts::ConflictTracker;
pub use locks::{LockHolder, LockRequestOutcome, LockTable, LockWaiter, ReleaseError};
pub use registry::{RegisterOutcome, RegisteredAgent, Registry};
pub use subscriptions::{EventMeta, SubscriptionTable, matches_filter};

use std::sync::Arc;

use axum::{Json, Router, routing::get};
use engram_core::MemoryEngine;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::CoordConfig;

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct ServerState {
    /// Handle into the coordination actor
    pub handle: CoordHandle,
}

/// The coordination server: actor plus WebSocket surface.
pub struct CoordinationServer {
    handle: CoordHandle,
    actor_task: JoinHandle<()>,
    config: CoordConfig,
}

impl CoordinationServer {
    /// Spawn the actor over an engine.
    pub fn new(engine: Arc<MemoryEngine>, config: CoordConfig) -> Self {
        let (handle, actor_task) = spawn_actor(config.clone(), Some(engine));
        Self {
            handle,
            actor_task,
            config,
        }
    }

    /// Spawn without an engine (coordination only, no gated writes).
    pub fn without_engine(config: CoordConfig) -> Self {
        let (handle, actor_task) = spawn_actor(config.clone(), None);
        Self {
            handle,
            actor_task,
            config,
        }
    }

    /// Handle for attaching connections in-process.
    pub fn handle(&self) -> CoordHandle {
        self.handle.clone()
    }

    /// The server's configuration.
    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    /// The axum router: `/ws` upgrade plus `/health`.
    pub fn router(&self) -> Router {
        let state = ServerState {
            handle: self.handle.clone(),
        };
        Router::new()
            .route("/ws", get(connection::ws_handler))
            .route("/health", get(health))
            .with_state(state)
    }

    /// Bind and serve until ctrl-c, then shut down in order: every agent
    /// receives `agent.disconnect(shutdown)` before sockets close.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = ("0.0.0.0", self.config.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(port = self.config.port, "coordination server listening");

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Orderly shutdown of the actor.
    pub async fn shutdown(&self) {
        self.handle.shutdown().await;
        self.actor_task.abort();
    }
}

async fn health(axum::extract::State(_state): axum::extract::State<ServerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
