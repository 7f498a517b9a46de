//! # ptwar_server
//!
//! Runs the world tick loop and the notification hubs in one process.
//!
//! ## Startup Sequence
//!
//! 1. Parse flags (each with an environment fallback).
//! 2. Register the world-start setup system and the built-in periodic systems.
//! 3. Subscribe a logging client to the `world` and `tick` topics.
//! 4. Start the loop and wait for Ctrl-C.
//! 5. Stop the loop within `--stop-timeout-secs`, then close the hubs.

mod systems;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ptwar_events::{HubClient, HubManager};
use ptwar_loop::config::DEFAULT_EVENTS_BUFFER;
use ptwar_loop::{GameLoop, GameLoopConfig};
use ptwar_system::Order;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use systems::{LogClient, Notice, ServerSystems, TICK_TOPIC, WORLD_TOPIC};

#[derive(Debug, Parser)]
#[command(name = "ptwar-server", version, about = "PTWAR world tick server")]
struct Args {
    /// Tick period in milliseconds
    #[arg(long, env = "PTWAR_TICK_MS", default_value_t = 100)]
    tick_ms: u64,

    /// Capacity of each phase queue
    #[arg(long, env = "PTWAR_EVENTS_BUFFER", default_value_t = DEFAULT_EVENTS_BUFFER)]
    events_buffer: usize,

    /// Worker count (defaults to the number of CPUs)
    #[arg(long, env = "PTWAR_WORKERS")]
    workers: Option<usize>,

    /// Seconds to wait for the loop to stop before giving up
    #[arg(long, default_value_t = 30)]
    stop_timeout_secs: u64,

    /// Ticks between hub stats reports; 0 disables them
    #[arg(long, default_value_t = 100)]
    stats_every: u64,
}

impl Args {
    fn loop_config(&self) -> GameLoopConfig {
        let config = GameLoopConfig::default()
            .with_tick_duration(Duration::from_millis(self.tick_ms))
            .with_events_buffer(self.events_buffer);
        match self.workers {
            Some(workers) => config.with_worker_count(workers),
            None => config,
        }
    }
}

/// Default to `info` for the server and the crates that drive it.
fn log_filter(filter: EnvFilter) -> Result<EnvFilter> {
    Ok(filter
        .add_directive("ptwar_server=info".parse()?)
        .add_directive("ptwar_loop=info".parse()?)
        .add_directive("ptwar_events=info".parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(EnvFilter::from_default_env())?)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "ptwar server starting");

    let config = args.loop_config();
    info!(
        tick = ?config.tick_duration,
        events_buffer = config.events_buffer,
        workers = config.worker_count,
        "loop configured"
    );

    let hubs = Arc::new(HubManager::<Notice>::new());
    let game_loop = GameLoop::new(config).context("invalid loop configuration")?;
    game_loop.add_setup(Order::First, systems::world_started(Arc::clone(&hubs)));
    game_loop.add_systems(&ServerSystems::new(Arc::clone(&hubs), args.stats_every));

    let logger: Arc<dyn HubClient<Notice>> = Arc::new(LogClient::new());
    hubs.add_client(WORLD_TOPIC, Arc::clone(&logger)).await;
    hubs.add_client(TICK_TOPIC, logger).await;

    game_loop.start()?;
    info!("loop started, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!(ticks = game_loop.tick_count(), "stopping loop");

    let stop_timeout = Duration::from_secs(args.stop_timeout_secs);
    match tokio::time::timeout(stop_timeout, game_loop.stop()).await {
        Ok(result) => result?,
        Err(_) => {
            error!(?stop_timeout, "loop did not stop in time");
            bail!("loop did not stop within {stop_timeout:?}");
        }
    }
    game_loop.close().await?;

    systems::log_final_stats(&hubs.stats());
    hubs.shutdown().await;

    info!(ticks = game_loop.tick_count(), "ptwar server shut down");
    Ok(())
}
