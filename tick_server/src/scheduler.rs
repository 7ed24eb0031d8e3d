//! Fixed-cadence fan-out of fresh ticks to interested connections.
//!
//! The scheduler owns the latest-price snapshot: between cycles it drains the
//! tick source channel into a per-symbol map, so intermediate updates within
//! a cycle are coalesced (lossy by design, last value wins). On each cycle it
//! groups the fresh symbols by interested connection via the registry's
//! reverse index and emits one `ticks` frame per connection with a non-empty
//! group. Connections with nothing fresh receive no frame that cycle — empty
//! batches are never sent.
//!
//! Delivery uses `try_send` on each connection's bounded outbound channel: a
//! full or vanished sink is a non-fatal drop for that cycle, never a
//! scheduler-wide stall.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, info, warn};
use tick_common::protocol::ServerMessage;
use tick_common::{Result, TickData};

use crate::registry::{ConnectionId, SubscriptionRegistry};

/// Connection-id keyed map of outbound frame senders.
///
/// Sessions register their bounded sender on accept and remove it on close;
/// the scheduler only ever `try_send`s through it.
#[derive(Default)]
pub struct OutboundSinks {
    inner: Mutex<HashMap<ConnectionId, Sender<ServerMessage>>>,
}

impl OutboundSinks {
    /// Create an empty sink map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound sender.
    pub fn register(&self, id: ConnectionId, tx: Sender<ServerMessage>) -> Result<()> {
        self.inner.lock()?.insert(id, tx);
        Ok(())
    }

    /// Drop a connection's outbound sender. Closing the channel is what
    /// terminates the session's writer thread.
    pub fn remove(&self, id: ConnectionId) -> Result<()> {
        self.inner.lock()?.remove(&id);
        Ok(())
    }

    /// Best-effort non-blocking delivery. Returns `false` when the sink is
    /// full or already gone.
    pub fn try_send(&self, id: ConnectionId, msg: ServerMessage) -> Result<bool> {
        let sinks = self.inner.lock()?;
        match sinks.get(&id) {
            Some(tx) => Ok(tx.try_send(msg).is_ok()),
            None => Ok(false),
        }
    }
}

/// Interval-driven broadcast loop over the shared registry.
pub struct BroadcastScheduler {
    interval: Duration,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    sinks: Arc<OutboundSinks>,
}

impl BroadcastScheduler {
    /// Create a scheduler broadcasting every `interval`.
    pub fn new(
        interval: Duration,
        registry: Arc<Mutex<SubscriptionRegistry>>,
        sinks: Arc<OutboundSinks>,
    ) -> Self {
        Self {
            interval,
            registry,
            sinks,
        }
    }

    /// Run until the tick source channel closes.
    ///
    /// Multiplexes the tick source and the cycle timer with crossbeam
    /// `select!`; the loop never blocks on a slow connection.
    pub fn run(&self, tick_rx: Receiver<TickData>) -> Result<()> {
        info!(
            "broadcast scheduler running, interval {} ms",
            self.interval.as_millis()
        );
        let cycle = crossbeam_channel::tick(self.interval);
        let mut fresh: HashMap<String, TickData> = HashMap::new();

        loop {
            select! {
                recv(tick_rx) -> msg => match msg {
                    Ok(tick) => {
                        // Last value wins within a cycle.
                        fresh.insert(tick.symbol.clone(), tick);
                    }
                    Err(_) => {
                        info!("tick source closed, scheduler stopping");
                        return Ok(());
                    }
                },
                recv(cycle) -> _ => self.flush(&mut fresh)?,
            }
        }
    }

    fn flush(&self, fresh: &mut HashMap<String, TickData>) -> Result<()> {
        if fresh.is_empty() {
            return Ok(());
        }
        let batches = {
            let registry = self.registry.lock()?;
            build_batches(fresh, &registry)
        };
        fresh.clear();

        let server_time = Utc::now().timestamp_millis();
        let interval_ms = self.interval.as_millis() as u64;
        for (id, ticks) in batches {
            let count = ticks.len();
            let msg = ServerMessage::Ticks {
                ticks,
                server_time,
                interval: interval_ms,
            };
            match self.sinks.try_send(id, msg) {
                Ok(true) => debug!("sent {} ticks to connection {}", count, id),
                Ok(false) => warn!(
                    "outbound buffer full or gone for connection {}; dropping this cycle",
                    id
                ),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Group the cycle's fresh ticks by interested connection.
///
/// A connection's batch contains only symbols it is subscribed to; a
/// connection with no fresh subscribed symbol gets no entry at all. Batches
/// are sorted by symbol for a stable wire order.
pub fn build_batches(
    fresh: &HashMap<String, TickData>,
    registry: &SubscriptionRegistry,
) -> HashMap<ConnectionId, Vec<TickData>> {
    let mut batches: HashMap<ConnectionId, Vec<TickData>> = HashMap::new();
    for (symbol, tick) in fresh {
        for id in registry.connections_for(symbol) {
            batches.entry(id).or_default().push(tick.clone());
        }
    }
    for batch in batches.values_mut() {
        batch.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, price: f64) -> TickData {
        TickData {
            symbol: symbol.to_string(),
            price,
            high: price + 1.0,
            low: price - 1.0,
            open: price,
            change: 0.0,
            change_percent: 0.0,
            volume: 100,
            timestamp: 1_700_000_000_000,
        }
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlapping_subscriptions_fan_out_per_connection() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(1, &syms(&["A", "B"])).unwrap();
        reg.subscribe(2, &syms(&["B", "C"])).unwrap();

        let mut fresh = HashMap::new();
        fresh.insert("B".to_string(), tick("B", 10.0));
        let batches = build_batches(&fresh, &reg);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[&1].len(), 1);
        assert_eq!(batches[&1][0].symbol, "B");
        assert_eq!(batches[&2].len(), 1);
        assert_eq!(batches[&2][0].symbol, "B");

        let mut fresh = HashMap::new();
        fresh.insert("A".to_string(), tick("A", 20.0));
        let batches = build_batches(&fresh, &reg);
        assert_eq!(batches.len(), 1, "only connection 1 is interested in A");
        assert!(batches.contains_key(&1));
    }

    #[test]
    fn batch_never_contains_foreign_symbols() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(1, &syms(&["AAPL", "GOOGL"])).unwrap();

        let mut fresh = HashMap::new();
        for s in ["AAPL", "GOOGL", "TSLA", "MSFT"] {
            fresh.insert(s.to_string(), tick(s, 100.0));
        }
        let batches = build_batches(&fresh, &reg);
        let batch = &batches[&1];
        let symbols: Vec<&str> = batch.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "GOOGL"]);
    }

    #[test]
    fn uninterested_connections_get_no_empty_batch() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(1, &syms(&["AAPL"])).unwrap();
        reg.subscribe(2, &syms(&["TSLA"])).unwrap();

        let mut fresh = HashMap::new();
        fresh.insert("AAPL".to_string(), tick("AAPL", 190.0));
        let batches = build_batches(&fresh, &reg);
        assert!(batches.contains_key(&1));
        assert!(!batches.contains_key(&2), "no empty batches");
    }

    #[test]
    fn intra_cycle_updates_coalesce_to_last_value() {
        // The fresh map is keyed by symbol, so a later insert replaces the
        // earlier tick; this pins the last-value-wins contract.
        let mut fresh = HashMap::new();
        fresh.insert("AAPL".to_string(), tick("AAPL", 100.0));
        fresh.insert("AAPL".to_string(), tick("AAPL", 101.5));

        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(7, &syms(&["AAPL"])).unwrap();
        let batches = build_batches(&fresh, &reg);
        assert_eq!(batches[&7].len(), 1);
        assert_eq!(batches[&7][0].price, 101.5);
    }
}
