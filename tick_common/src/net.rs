//! Shared networking constants and helpers used by client and server.

/// TCP port for the persistent tick-stream connection.
pub const STREAM_PORT: u16 = 8090;

/// Default broadcast cadence in milliseconds.
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 10_000;
/// Default server heartbeat cadence in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
/// Default client staleness threshold in milliseconds.
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 20_000;
/// Default maximum consecutive reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default base reconnection delay in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
/// Backoff ceiling as a multiplier of the base reconnection delay.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 8;

/// Helper to format an IPv4 address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
