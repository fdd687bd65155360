//! engram-coord: the agent coordination server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engram_coord::{CoordConfig, CoordinationServer};
use engram_core::{EngineConfig, MemoryEngine};

#[derive(Debug, Parser)]
#[command(name = "engram-coord", version, about = "Agent coordination server for engram")]
struct Args {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory for the memory engine
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Project id for data-dir and collection isolation
    #[arg(long)]
    project: Option<String>,

    /// Run fully offline: no vector DB, no embedder, no sidecar
    #[arg(long)]
    offline: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut engine_config = EngineConfig::default().with_env_overrides();
    if let Some(data_dir) = args.data_dir {
        engine_config.data_dir = data_dir;
    }
    if let Some(project) = args.project {
        engine_config.project_id = Some(project);
    }
    if args.offline {
        engine_config.offline_mode = true;
    }

    let mut coord_config = CoordConfig::default().with_env_overrides();
    if let Some(port) = args.port {
        coord_config.port = port;
    }

    let engine =
        Arc::new(MemoryEngine::open(engine_config).context("opening the memory engine")?);
    info!(version = engram_coord::VERSION, "engram starting");

    let server = CoordinationServer::new(engine, coord_config);
    server.serve().await.context("serving")?;
    Ok(())
}
