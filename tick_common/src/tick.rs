//! Tick payloads and symbol validation shared between client and server.
//!
//! A `TickData` is one priced snapshot for a single symbol. Symbols are plain
//! strings bounded to 10 characters and are always stored and compared in
//! upper case; normalization happens once, at the edge, so every structure
//! downstream can rely on the canonical form.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::result::Result;

/// Maximum length of a single symbol string.
pub const MAX_SYMBOL_LEN: usize = 10;
/// Minimum number of symbols accepted in one subscribe/unsubscribe request.
pub const MIN_SYMBOLS_PER_REQUEST: usize = 1;
/// Maximum number of symbols accepted in one subscribe/unsubscribe request.
pub const MAX_SYMBOLS_PER_REQUEST: usize = 50;

/// Market tick for a single symbol.
///
/// Produced by the tick source, immutable once emitted. The scheduler keeps
/// only the latest tick per symbol; there is no history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickData {
    /// Symbol identifier, upper-cased, 1..=10 chars.
    pub symbol: String,
    /// Last traded price. Always positive.
    pub price: f64,
    /// Session high. Always positive.
    pub high: f64,
    /// Session low. Always positive.
    pub low: f64,
    /// Session open. Always positive.
    pub open: f64,
    /// Absolute change since the session open. Signed.
    pub change: f64,
    /// Percentage change since the session open. Signed.
    pub change_percent: f64,
    /// Cumulative traded volume.
    pub volume: u64,
    /// UTC timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TickData {
    /// Check the numeric and symbol constraints of the payload.
    ///
    /// All four price fields must be strictly positive and the symbol must be
    /// a valid canonical symbol. `change`/`change_percent` may be any sign.
    pub fn validate(&self) -> Result<()> {
        normalize_symbol(&self.symbol)?;
        for (name, value) in [
            ("price", self.price),
            ("high", self.high),
            ("low", self.low),
            ("open", self.open),
        ] {
            if !(value > 0.0) {
                return Err(StreamError::InvalidRequest(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Normalize one raw symbol to canonical upper-case form.
///
/// Rejects empty strings and symbols longer than [`MAX_SYMBOL_LEN`].
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StreamError::InvalidRequest(
            "symbol must not be empty".to_string(),
        ));
    }
    if trimmed.len() > MAX_SYMBOL_LEN {
        return Err(StreamError::InvalidRequest(format!(
            "symbol '{}' exceeds {} characters",
            trimmed, MAX_SYMBOL_LEN
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Normalize a whole subscribe/unsubscribe symbol list.
///
/// Enforces the per-request count bound of
/// [`MIN_SYMBOLS_PER_REQUEST`]..=[`MAX_SYMBOLS_PER_REQUEST`] and validates
/// every entry. The check is atomic: one bad symbol rejects the entire
/// request and nothing is returned for partial application.
pub fn normalize_symbols(raw: &[String]) -> Result<Vec<String>> {
    if raw.len() < MIN_SYMBOLS_PER_REQUEST || raw.len() > MAX_SYMBOLS_PER_REQUEST {
        return Err(StreamError::InvalidRequest(format!(
            "request must contain between {} and {} symbols, got {}",
            MIN_SYMBOLS_PER_REQUEST,
            MAX_SYMBOLS_PER_REQUEST,
            raw.len()
        )));
    }
    raw.iter().map(|s| normalize_symbol(s)).collect()
}
