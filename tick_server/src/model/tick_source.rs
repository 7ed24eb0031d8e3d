//! Synthetic tick source.
//!
//! Stand-in for the real price feed at its boundary: a background thread
//! that synthesizes `TickData` for a fixed symbol universe with a small
//! random walk and publishes every tick to a channel. The scheduler depends
//! only on that channel, so swapping in a real feed touches nothing else.
//!
//! Per symbol the source tracks the session open, running high/low, and
//! cumulative volume, deriving `change`/`changePercent` from the open the
//! way a dashboard expects.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, bounded};
use log::{debug, info};
use rand::Rng;
use tick_common::TickData;

/// Symbol universe served by the synthetic source.
pub const SOURCE_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "JPM",
];

/// Per-symbol walk state.
#[derive(Debug, Clone)]
struct SymbolState {
    open: f64,
    high: f64,
    low: f64,
    last: f64,
    volume: u64,
}

impl SymbolState {
    fn new(open: f64) -> Self {
        Self {
            open,
            high: open,
            low: open,
            last: open,
            volume: 0,
        }
    }

    /// Advance the walk one step and produce the resulting tick.
    fn next_tick(&mut self, symbol: &str) -> TickData {
        let mut rng = rand::rng();
        let step: f64 = rng.random_range(-0.01..0.01);
        // Clamp to a minimum positive value; a zero or negative price is
        // nonsensical and violates the wire contract.
        self.last = (self.last * (1.0 + step)).max(0.01);
        self.high = self.high.max(self.last);
        self.low = self.low.min(self.last);
        self.volume += 100 + rng.random_range(0..5000) as u64;

        let change = self.last - self.open;
        TickData {
            symbol: symbol.to_string(),
            price: self.last,
            high: self.high,
            low: self.low,
            open: self.open,
            change,
            change_percent: change / self.open * 100.0,
            volume: self.volume,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Synthetic market data generator.
pub struct TickSource;

impl TickSource {
    /// Start the generator thread and return the channel of produced ticks.
    ///
    /// The thread stops on its own when the receiver is dropped.
    pub fn start(interval: Duration) -> Receiver<TickData> {
        let (tx, rx) = bounded::<TickData>(1024);

        thread::spawn(move || {
            let mut rng = rand::rng();
            let mut states: HashMap<&str, SymbolState> = SOURCE_SYMBOLS
                .iter()
                .map(|s| (*s, SymbolState::new(rng.random_range(50.0..500.0))))
                .collect();
            info!(
                "tick source started: {} symbols every {} ms",
                states.len(),
                interval.as_millis()
            );

            loop {
                for symbol in SOURCE_SYMBOLS {
                    let state = states
                        .get_mut(symbol)
                        .expect("state exists for every source symbol");
                    let tick = state.next_tick(symbol);
                    debug!("generated {} @ {:.2}", tick.symbol, tick.price);
                    if tx.send(tick).is_err() {
                        info!("tick consumer gone, source stopping");
                        return;
                    }
                }
                thread::sleep(interval);
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_keeps_wire_invariants() {
        let mut state = SymbolState::new(100.0);
        for _ in 0..500 {
            let tick = state.next_tick("AAPL");
            assert!(tick.validate().is_ok());
            assert!(tick.low <= tick.price && tick.price <= tick.high);
            assert_eq!(tick.open, 100.0);
        }
    }

    #[test]
    fn change_fields_are_consistent_with_open() {
        let mut state = SymbolState::new(200.0);
        let tick = state.next_tick("MSFT");
        assert!((tick.change - (tick.price - tick.open)).abs() < 1e-9);
        assert!((tick.change_percent - tick.change / tick.open * 100.0).abs() < 1e-9);
    }

    #[test]
    fn volume_accumulates_monotonically() {
        let mut state = SymbolState::new(100.0);
        let first = state.next_tick("TSLA").volume;
        let second = state.next_tick("TSLA").volume;
        assert!(second > first);
    }
}
