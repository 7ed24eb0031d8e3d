//! Wire protocol messages exchanged between client and server.
//!
//! Every frame is a JSON object with a literal `type` discriminator, carried
//! one per line over a persistent TCP connection (newline-delimited JSON).
//! The discriminator maps onto tagged enums here, so routing is an exhaustive
//! `match` on the decoded variant — a new message kind cannot be silently
//! ignored, it fails to compile instead.
//!
//! Decoding is all-or-nothing: an invalid frame yields a `StreamError` and
//! never a partially populated value. Encoding is total for every valid
//! in-memory message.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use strum_macros::Display;

use crate::result::Result;
use crate::tick::TickData;

/// Messages sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Request tick updates for the listed symbols (1..=50 entries).
    Subscribe {
        /// Raw symbols as sent; normalized server-side.
        symbols: Vec<String>,
    },
    /// Stop tick updates for the listed symbols (1..=50 entries).
    Unsubscribe {
        /// Raw symbols as sent; normalized server-side.
        symbols: Vec<String>,
    },
}

/// Status values carried in a [`ServerMessage::Status`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatusKind {
    /// The connection was accepted; no symbols are subscribed yet.
    Connected,
    /// A subscription mutation was applied; the full current set follows.
    Subscribed,
    /// A server-side condition the client should surface.
    Error,
}

/// Messages sent by the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// One broadcast cycle's worth of fresh ticks for this connection.
    Ticks {
        /// Latest tick per subscribed symbol that updated this cycle.
        ticks: Vec<TickData>,
        /// Server wall clock at emission, milliseconds since epoch.
        server_time: i64,
        /// Configured broadcast cadence in milliseconds.
        interval: u64,
    },
    /// Transport liveness signal. Carries no data-freshness meaning.
    Heartbeat {
        /// Server wall clock at emission, milliseconds since epoch.
        server_time: i64,
    },
    /// Authoritative session status.
    ///
    /// `subscribed_symbols`, when present, is always the complete current
    /// set — never a delta — so clients may replace their local view with it.
    Status {
        /// Status discriminant.
        status: StatusKind,
        /// Complete current subscribed-symbol set.
        #[serde(skip_serializing_if = "Option::is_none")]
        subscribed_symbols: Option<Vec<String>>,
        /// Optional human-readable detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A rejected request or protocol violation. The session stays open.
    Error {
        /// Machine-readable error class.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

/// Encode a message as one newline-terminated JSON frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON frame into the expected message type.
///
/// The line terminator, if still present, is ignored. A malformed frame or an
/// unknown `type` tag returns `StreamError::Json`.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T> {
    let msg = serde_json::from_str(line.trim_end())?;
    Ok(msg)
}
