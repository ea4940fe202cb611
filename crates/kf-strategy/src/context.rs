use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use kf_types::Symbol;

use crate::strategy::StrategyParams;

/// Atomic per-strategy counters maintained by the framework.
#[derive(Debug, Default)]
pub struct StrategyCounters {
    pub received_events: AtomicU64,
    pub processed_events: AtomicU64,
    pub signals_generated: AtomicU64,
    pub errors: AtomicU64,
}

/// Framework-side bookkeeping for one registered strategy: its
/// configuration, registration time, counters, and the holdings attributed
/// to it by fills.
#[derive(Debug)]
pub struct StrategyContext {
    pub params: Mutex<StrategyParams>,
    pub registered_at: DateTime<Utc>,
    pub counters: StrategyCounters,
    holdings: Mutex<HashMap<Symbol, i64>>,
}

impl StrategyContext {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            params: Mutex::new(params),
            registered_at: Utc::now(),
            counters: StrategyCounters::default(),
            holdings: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a signed quantity delta from a fill attributed to the strategy.
    pub fn apply_holding_delta(&self, symbol: &Symbol, delta: i64) {
        let mut holdings = self.holdings.lock();
        let quantity = holdings.entry(symbol.clone()).or_insert(0);
        *quantity += delta;
        if *quantity == 0 {
            holdings.remove(symbol);
        }
    }

    /// Symbols this strategy currently holds (non-zero quantity).
    pub fn held_symbols(&self) -> HashSet<Symbol> {
        self.holdings.lock().keys().cloned().collect()
    }

    pub fn holding(&self, symbol: &Symbol) -> i64 {
        self.holdings.lock().get(symbol).copied().unwrap_or(0)
    }

    pub fn snapshot(&self, strategy_id: &str, status: &str) -> StrategySnapshot {
        StrategySnapshot {
            strategy_id: strategy_id.to_string(),
            status: status.to_string(),
            registered_at: self.registered_at,
            received_events: self.counters.received_events.load(Ordering::Relaxed),
            processed_events: self.counters.processed_events.load(Ordering::Relaxed),
            signals_generated: self.counters.signals_generated.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            held_symbols: self.held_symbols().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Serializable view of one strategy for operator diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub strategy_id: String,
    pub status: String,
    pub registered_at: DateTime<Utc>,
    pub received_events: u64,
    pub processed_events: u64,
    pub signals_generated: u64,
    pub errors: u64,
    pub held_symbols: Vec<String>,
}
