use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;

use kf_types::{Bar, Symbol};

/// Concurrent latest-bar map shared by the feeder, the execution venue, and
/// anything that needs a reference price.  Writers are the feed; readers see
/// eventually consistent snapshots.
#[derive(Debug, Default)]
pub struct MarketSnapshot {
    bars: DashMap<Symbol, Bar>,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the newest bar for its symbol; stale updates (older timestamp
    /// than what is held) are ignored.
    pub fn update(&self, bar: Bar) {
        match self.bars.get_mut(&bar.symbol) {
            Some(mut current) if current.timestamp <= bar.timestamp => *current = bar,
            Some(_) => {}
            None => {
                self.bars.insert(bar.symbol.clone(), bar);
            }
        }
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<Bar> {
        self.bars.get(symbol).map(|bar| bar.value().clone())
    }

    pub fn latest_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.bars.get(symbol).map(|bar| bar.close)
    }

    /// Close prices for every tracked symbol.
    pub fn prices(&self) -> HashMap<Symbol, Decimal> {
        self.bars
            .iter()
            .map(|entry| (entry.key().clone(), entry.close))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}
