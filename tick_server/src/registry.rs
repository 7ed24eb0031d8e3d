//! Shared subscription state for all live connections.
//!
//! The registry keeps a forward index (connection → symbol set) and a reverse
//! index (symbol → interested connections) that are mutated together and can
//! never drift. It is the single shared mutable structure on the server and
//! is wrapped in `Arc<Mutex<_>>` by the caller; every method here is a plain
//! read-modify-write under that lock.
//!
//! The 1–50 symbols-per-request bound is enforced here, not only at the
//! transport edge, so any caller is protected. Rejections are atomic: an
//! out-of-bounds or malformed request changes nothing.

use std::collections::{HashMap, HashSet};

use log::debug;
use tick_common::Result;
use tick_common::tick::normalize_symbols;

/// Opaque identifier for one live connection.
pub type ConnectionId = u64;

/// Per-connection symbol sets plus the symbol → connections reverse index.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<ConnectionId, HashSet<String>>,
    interest: HashMap<String, HashSet<ConnectionId>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to a connection's subscription.
    ///
    /// Symbols are normalized to upper case on insert. Re-adding an already
    /// subscribed symbol is a no-op on the set, but the caller still receives
    /// the full current set so it can emit a fresh authoritative status.
    /// Returns the complete subscribed set, sorted.
    pub fn subscribe(&mut self, id: ConnectionId, symbols: &[String]) -> Result<Vec<String>> {
        let normalized = normalize_symbols(symbols)?;
        let set = self.subscriptions.entry(id).or_default();
        for symbol in normalized {
            if set.insert(symbol.clone()) {
                self.interest.entry(symbol).or_default().insert(id);
            }
        }
        debug!("connection {} subscription now {} symbols", id, set.len());
        Ok(sorted(set))
    }

    /// Remove only the named symbols from a connection's subscription.
    ///
    /// Unrelated symbols are untouched. Returns the complete remaining set,
    /// sorted (possibly empty).
    pub fn unsubscribe(&mut self, id: ConnectionId, symbols: &[String]) -> Result<Vec<String>> {
        let normalized = normalize_symbols(symbols)?;
        let set = self.subscriptions.entry(id).or_default();
        for symbol in normalized {
            if set.remove(&symbol) {
                if let Some(ids) = self.interest.get_mut(&symbol) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.interest.remove(&symbol);
                    }
                }
            }
        }
        debug!("connection {} subscription now {} symbols", id, set.len());
        Ok(sorted(set))
    }

    /// Current subscribed set for a connection, sorted.
    pub fn symbols_for(&self, id: ConnectionId) -> Vec<String> {
        self.subscriptions.get(&id).map(sorted).unwrap_or_default()
    }

    /// Connections interested in a symbol. The symbol is expected in
    /// canonical upper-case form.
    pub fn connections_for(&self, symbol: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.interest
            .get(symbol)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }

    /// Erase every trace of a connection from both indexes.
    ///
    /// This is the only full-erase path and must run on every disconnect,
    /// normal or abnormal, or the reverse index grows without bound.
    pub fn remove_connection(&mut self, id: ConnectionId) {
        if let Some(set) = self.subscriptions.remove(&id) {
            for symbol in set {
                if let Some(ids) = self.interest.get_mut(&symbol) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.interest.remove(&symbol);
                    }
                }
            }
        }
        debug!("connection {} removed from registry", id);
    }

    /// Number of connections with a subscription entry.
    pub fn connection_count(&self) -> usize {
        self.subscriptions.len()
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut symbols: Vec<String> = set.iter().cloned().collect();
    symbols.sort();
    symbols
}
