//! Tick Client — connects to the tick server over a persistent TCP
//! connection, subscribes to a set of symbols, and prints received ticks to
//! stdout. The connection manager keeps the subscription alive across
//! network interruptions: it reconnects with capped exponential backoff,
//! replays the subscribed symbol set automatically, and flags the view as
//! stale when no tick data arrives within the configured threshold.
//!
//! Usage example (CLI):
//! ```bash
//! tick_client --server-ip 192.168.0.10 --symbols aapl,googl,msft
//! ```
//!
//! Symbols are case-insensitive on input; the wire always carries them
//! upper-cased.
#![warn(missing_docs)]
mod args;
mod manager;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use log::{error, info, warn};
use tick_common::Result;
use tick_common::net::addr;

use crate::args::Args;
use crate::manager::{ClientEvent, ClientState, ConnectionManager, ManagerConfig};

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("Error setting Ctrl+C handler");
    }

    let config = ManagerConfig {
        server_addr: addr(&args.server_ip, args.port),
        max_reconnect_attempts: args.max_reconnect_attempts,
        reconnect_base_delay: Duration::from_millis(args.reconnect_base_delay_ms),
        stale_threshold: Duration::from_millis(args.stale_threshold_ms),
    };
    info!("connecting to {}", config.server_addr);

    let (manager, events) = ConnectionManager::new(config);
    manager.connect()?;

    let mut subscribed_once = false;
    while !shutdown.load(Ordering::Relaxed) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ClientEvent::StateChanged(state)) => {
                info!("state: {}", state);
                // The manager replays the set on reconnects by itself; only
                // the very first connect needs the explicit request.
                if state == ClientState::Connected && !subscribed_once {
                    manager.subscribe(&args.symbols)?;
                    subscribed_once = true;
                }
            }
            Ok(ClientEvent::Ticks(ticks)) => {
                for tick in ticks {
                    info!(
                        "TICK: {} Price={:.2} Change={:+.2} ({:+.2}%) Volume={} Time={}",
                        tick.symbol,
                        tick.price,
                        tick.change,
                        tick.change_percent,
                        tick.volume,
                        tick.timestamp
                    );
                }
            }
            Ok(ClientEvent::Status {
                status,
                subscribed_symbols,
                ..
            }) => {
                info!(
                    "status: {} subscribed={:?}",
                    status,
                    subscribed_symbols.unwrap_or_default()
                );
            }
            Ok(ClientEvent::ServerError { code, message }) => {
                warn!("server error [{}]: {}", code, message);
            }
            Ok(ClientEvent::ReconnectExhausted(detail)) => {
                error!("connection lost for good: {}", detail);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    manager.disconnect()?;
    info!("client stopped");
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
