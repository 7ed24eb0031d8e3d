//! Domain models and helpers for the tick server.
//!
//! - `tick_source` — synthetic market data generator standing in for the
//!   out-of-scope price feed; the scheduler only sees its output channel.

pub mod tick_source;
