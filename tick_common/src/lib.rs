//!
//! Common types and utilities shared by the tick server and client.
//!
//! This crate aggregates:
//! - `error` — unified error type `StreamError` used across the workspace.
//! - `result` — handy `Result<T, StreamError>` alias.
//! - `tick` — the `TickData` payload plus symbol validation/normalization.
//! - `protocol` — the tagged wire messages exchanged between client and server.
//! - `net` — networking constants and small helpers.
#![warn(missing_docs)]
pub mod error;
pub mod result;
pub mod tick;
pub mod protocol;
pub mod net;

pub use error::StreamError;
pub use result::Result;
pub use tick::TickData;
