//! Tick streaming server.
//!
//! This binary accepts persistent TCP connections from dashboard clients and
//! streams market tick updates to them on a fixed broadcast cadence. It wires
//! together the building blocks:
//!
//! - `TickSource` — synthesizes `TickData` and publishes it on a channel
//!   (stands in for the out-of-scope real price feed).
//! - `SubscriptionRegistry` — the single shared structure mapping
//!   connections to symbol sets and back; mutex-guarded because every
//!   session thread mutates it.
//! - `BroadcastScheduler` — coalesces ticks to latest-per-symbol and fans
//!   them out per connection each cycle, never blocking on a slow client.
//! - Per-connection session threads — decode subscribe/unsubscribe frames,
//!   answer with authoritative `status` or `error` frames, emit heartbeats,
//!   and erase their registry footprint on every disconnect path.
//!
//! Wire protocol: newline-delimited JSON frames with a `type` discriminator;
//! see `tick_common::protocol`.
#![warn(missing_docs)]
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tick_common::Result;
use tick_common::net::{
    DEFAULT_BROADCAST_INTERVAL_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, STREAM_PORT, addr,
};

use crate::registry::SubscriptionRegistry;
use crate::scheduler::{BroadcastScheduler, OutboundSinks};
use crate::model::tick_source::TickSource;

pub mod model;
mod registry;
mod scheduler;
mod session;

/// CLI configuration surface. Owned by deployment glue; consumed here as
/// plain values.
#[derive(Parser, Debug)]
#[command(about = "Streams market ticks to subscribed dashboard clients")]
struct Args {
    /// Address to bind the stream listener on.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port for client connections.
    #[arg(long, default_value_t = STREAM_PORT)]
    port: u16,

    /// Broadcast cadence in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BROADCAST_INTERVAL_MS)]
    broadcast_interval_ms: u64,

    /// Heartbeat cadence in milliseconds.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    heartbeat_interval_ms: u64,

    /// Synthetic tick source cadence in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    source_interval_ms: u64,
}

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let registry = Arc::new(Mutex::new(SubscriptionRegistry::new()));
    let sinks = Arc::new(OutboundSinks::new());

    let tick_rx = TickSource::start(Duration::from_millis(args.source_interval_ms));

    let scheduler = BroadcastScheduler::new(
        Duration::from_millis(args.broadcast_interval_ms),
        Arc::clone(&registry),
        Arc::clone(&sinks),
    );
    thread::spawn(move || {
        if let Err(e) = scheduler.run(tick_rx) {
            error!("broadcast scheduler failed: {}", e);
        }
    });

    let bind_addr = addr(&args.bind, args.port);
    let listener = TcpListener::bind(&bind_addr)?;
    info!("tick stream server listening on {}", bind_addr);

    let next_id = AtomicU64::new(1);
    let heartbeat_interval = Duration::from_millis(args.heartbeat_interval_ms);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let registry = Arc::clone(&registry);
                let sinks = Arc::clone(&sinks);
                thread::spawn(move || {
                    // Session failures stay contained to that client; the
                    // accept loop keeps serving everyone else.
                    if let Err(e) =
                        session::handle_connection(id, stream, registry, sinks, heartbeat_interval)
                    {
                        error!("session {} ended with error: {}", id, e);
                    }
                });
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
    Ok(())
}

fn init_logger() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
