//! CLI arguments for the tick client.
//!
//! The reconnection and staleness knobs mirror the configuration surface the
//! deployment environment owns; the connection manager consumes them as
//! plain values.
use clap::Parser;
use tick_common::net::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY_MS, DEFAULT_STALE_THRESHOLD_MS,
    STREAM_PORT,
};

/// Tick client CLI options.
#[derive(Parser, Debug)]
#[command(about = "Subscribes to live market ticks and prints them")]
pub struct Args {
    /// Tick server IP address.
    #[arg(long, default_value = "127.0.0.1")]
    pub server_ip: String,

    /// Tick server port.
    #[arg(long, default_value_t = STREAM_PORT)]
    pub port: u16,

    /// Comma-separated symbols to subscribe to (1..=50).
    #[arg(long, value_delimiter = ',', default_value = "AAPL,GOOGL")]
    pub symbols: Vec<String>,

    /// Consecutive failed connection attempts before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,

    /// Base reconnection delay in milliseconds (doubles per failure, 8x cap).
    #[arg(long, default_value_t = DEFAULT_RECONNECT_BASE_DELAY_MS)]
    pub reconnect_base_delay_ms: u64,

    /// Milliseconds without tick data before the view is marked stale.
    #[arg(long, default_value_t = DEFAULT_STALE_THRESHOLD_MS)]
    pub stale_threshold_ms: u64,
}
