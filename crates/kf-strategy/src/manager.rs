use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

use kf_engine::{EventBus, EventHandler};
use kf_types::{
    Bar, Event, EventKind, EventPayload, Fill, KfResult, StrategyError, Symbol, TimerEvent,
};

use crate::context::{StrategyContext, StrategySnapshot};
use crate::strategy::{Strategy, StrategyParams, StrategyStatus, UniverseView};

struct StrategyEntry {
    strategy: Mutex<Box<dyn Strategy>>,
    context: Arc<StrategyContext>,
}

/// Registry of strategy instances plus the event-dispatch rules that feed
/// them.
///
/// The manager registers itself on the bus for `MARKET`, `FILL`, and `TIMER`
/// events; every signal a strategy returns is published as a `SignalEvent`
/// carrying the triggering market event's id.
pub struct StrategyManager {
    bus: Arc<EventBus>,
    entries: DashMap<String, StrategyEntry>,
    universe: RwLock<HashSet<Symbol>>,
    max_strategies: usize,
    /// Validity window applied to signals that kept the built-in default.
    signal_timeout_secs: u64,
}

impl StrategyManager {
    pub fn new(bus: Arc<EventBus>, max_strategies: usize) -> Arc<Self> {
        Self::with_signal_timeout(bus, max_strategies, kf_types::DEFAULT_SIGNAL_VALIDITY_SECS)
    }

    pub fn with_signal_timeout(
        bus: Arc<EventBus>,
        max_strategies: usize,
        signal_timeout_secs: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            entries: DashMap::new(),
            universe: RwLock::new(HashSet::new()),
            max_strategies,
            signal_timeout_secs,
        })
    }

    /// Subscribe the manager to the event kinds it coordinates.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> KfResult<()> {
        for kind in [EventKind::Market, EventKind::Fill, EventKind::Timer] {
            bus.register(kind, Arc::clone(self) as Arc<dyn EventHandler>)?;
        }
        Ok(())
    }

    /// Replace the tradable universe consulted for watched-symbol sets.
    pub fn set_universe(&self, universe: HashSet<Symbol>) {
        *self.universe.write() = universe;
    }

    /// Register and initialize a strategy.  Rejects duplicates, a full
    /// registry, and strategies whose `initialize` fails.
    pub fn register(&self, mut strategy: Box<dyn Strategy>, params: StrategyParams) -> KfResult<()> {
        let id = strategy.strategy_id().to_string();
        if id.is_empty() {
            return Err(StrategyError::InvalidConfig {
                message: "strategy id must not be empty".to_string(),
            }
            .into());
        }
        if self.entries.contains_key(&id) {
            return Err(StrategyError::AlreadyRegistered { strategy_id: id }.into());
        }
        if self.entries.len() >= self.max_strategies {
            return Err(StrategyError::LimitReached {
                max: self.max_strategies,
            }
            .into());
        }

        strategy
            .initialize(&params)
            .map_err(|e| StrategyError::InitializationFailed {
                message: format!("{id}: {e}"),
            })?;

        info!(strategy = %id, "strategy registered");
        self.entries.insert(
            id,
            StrategyEntry {
                strategy: Mutex::new(strategy),
                context: Arc::new(StrategyContext::new(params)),
            },
        );
        Ok(())
    }

    /// Stop and remove a strategy.
    pub fn unregister(&self, strategy_id: &str) -> KfResult<()> {
        let Some((_, entry)) = self.entries.remove(strategy_id) else {
            return Err(StrategyError::NotFound {
                strategy_id: strategy_id.to_string(),
            }
            .into());
        };
        if let Err(e) = entry.strategy.lock().stop() {
            warn!(strategy = strategy_id, error = %e, "stop during unregister failed");
        }
        info!(strategy = strategy_id, "strategy unregistered");
        Ok(())
    }

    fn with_strategy<T>(
        &self,
        strategy_id: &str,
        f: impl FnOnce(&mut Box<dyn Strategy>) -> KfResult<T>,
    ) -> KfResult<T> {
        let entry = self.entries.get(strategy_id).ok_or_else(|| StrategyError::NotFound {
            strategy_id: strategy_id.to_string(),
        })?;
        let mut strategy = entry.strategy.lock();
        f(&mut strategy)
    }

    pub fn start_strategy(&self, strategy_id: &str) -> KfResult<()> {
        self.with_strategy(strategy_id, |s| s.start())
    }

    pub fn stop_strategy(&self, strategy_id: &str) -> KfResult<()> {
        self.with_strategy(strategy_id, |s| s.stop())
    }

    pub fn start_all(&self) {
        for entry in self.entries.iter() {
            if let Err(e) = entry.strategy.lock().start() {
                warn!(strategy = entry.key().as_str(), error = %e, "start failed");
            }
        }
    }

    pub fn stop_all(&self) {
        for entry in self.entries.iter() {
            if let Err(e) = entry.strategy.lock().stop() {
                warn!(strategy = entry.key().as_str(), error = %e, "stop failed");
            }
        }
    }

    /// Hot-update a strategy's parameters.
    pub fn update_strategy_params(&self, strategy_id: &str, params: StrategyParams) -> KfResult<()> {
        self.with_strategy(strategy_id, |s| s.update_params(&params))?;
        if let Some(entry) = self.entries.get(strategy_id) {
            *entry.context.params.lock() = params;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics for every registered strategy.
    pub fn snapshots(&self) -> Vec<StrategySnapshot> {
        let mut snapshots: Vec<StrategySnapshot> = self
            .entries
            .iter()
            .map(|entry| {
                let status = format!("{:?}", entry.strategy.lock().status());
                entry.context.snapshot(entry.key(), &status)
            })
            .collect();
        snapshots.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        snapshots
    }

    /// Symbols held by any strategy (for universal-stop sweeps).
    fn all_holdings(&self) -> HashSet<Symbol> {
        let mut all = HashSet::new();
        for entry in self.entries.iter() {
            all.extend(entry.context.held_symbols());
        }
        all
    }

    // -- dispatch rules -----------------------------------------------------

    fn dispatch_market(&self, event: &Event, bar: &Bar) {
        // Snapshot the shared sets up front so per-strategy dispatch never
        // nests registry iteration.
        let universe = self.universe.read().clone();
        let all_holdings = self.all_holdings();

        for entry in self.entries.iter() {
            let context = Arc::clone(&entry.context);
            let mut strategy = entry.strategy.lock();
            if strategy.status() != StrategyStatus::Running {
                continue;
            }
            let view = UniverseView {
                universe: universe.clone(),
                own_holdings: context.held_symbols(),
                all_holdings: all_holdings.clone(),
            };
            if !strategy.watched_symbols(&view).contains(&bar.symbol) {
                continue;
            }

            context.counters.received_events.fetch_add(1, Ordering::Relaxed);
            match strategy.on_market_event(bar) {
                Ok(signals) => {
                    context.counters.processed_events.fetch_add(1, Ordering::Relaxed);
                    context
                        .counters
                        .signals_generated
                        .fetch_add(signals.len() as u64, Ordering::Relaxed);
                    drop(strategy);
                    for mut signal in signals {
                        if signal.validity_secs == kf_types::DEFAULT_SIGNAL_VALIDITY_SECS {
                            signal.validity_secs = self.signal_timeout_secs;
                        }
                        self.bus.publish(Event::signal(signal, Some(event.id)));
                    }
                }
                Err(e) => {
                    context.counters.errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        strategy = entry.key().as_str(),
                        symbol = %bar.symbol,
                        error = %e,
                        "strategy market callback failed"
                    );
                }
            }
        }
    }

    fn dispatch_fill(&self, fill: &Fill) {
        let Some(strategy_id) = fill.strategy_id.as_deref() else {
            return;
        };
        let Some(entry) = self.entries.get(strategy_id) else {
            return;
        };

        entry.context.apply_holding_delta(&fill.symbol, fill.signed_quantity());

        let mut strategy = entry.strategy.lock();
        if strategy.status() != StrategyStatus::Running {
            return;
        }
        entry
            .context
            .counters
            .received_events
            .fetch_add(1, Ordering::Relaxed);
        match strategy.on_fill_event(fill) {
            Ok(()) => {
                entry
                    .context
                    .counters
                    .processed_events
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                entry.context.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(strategy = strategy_id, error = %e, "strategy fill callback failed");
            }
        }
    }

    fn dispatch_timer(&self, timer: &TimerEvent) {
        for entry in self.entries.iter() {
            let mut strategy = entry.strategy.lock();
            if strategy.status() != StrategyStatus::Running {
                continue;
            }
            entry
                .context
                .counters
                .received_events
                .fetch_add(1, Ordering::Relaxed);
            match strategy.on_timer_event(timer) {
                Ok(()) => {
                    entry
                        .context
                        .counters
                        .processed_events
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    entry.context.counters.errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        strategy = entry.key().as_str(),
                        error = %e,
                        "strategy timer callback failed"
                    );
                }
            }
        }
    }
}

impl EventHandler for StrategyManager {
    fn name(&self) -> &str {
        "strategy-manager"
    }

    fn handle_event(&self, event: &Event) -> KfResult<()> {
        match &event.payload {
            EventPayload::Market(bar) => self.dispatch_market(event, bar),
            EventPayload::Fill(fill) => self.dispatch_fill(fill),
            EventPayload::Timer(timer) => self.dispatch_timer(timer),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use chrono::Utc;
    use kf_types::{Direction, Frequency, KfError, Signal};
    use rust_decimal_macros::dec;

    struct ScriptedStrategy {
        id: String,
        kind: StrategyKind,
        status: StrategyStatus,
        emit_on_market: bool,
        fail_market: bool,
        fail_init: bool,
        fills_seen: usize,
        timers_seen: usize,
    }

    impl ScriptedStrategy {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                kind: StrategyKind::Entry,
                status: StrategyStatus::NotInitialized,
                emit_on_market: true,
                fail_market: false,
                fail_init: false,
                fills_seen: 0,
                timers_seen: 0,
            }
        }
    }

    impl Strategy for ScriptedStrategy {
        fn strategy_id(&self) -> &str {
            &self.id
        }
        fn kind(&self) -> StrategyKind {
            self.kind
        }
        fn status(&self) -> StrategyStatus {
            self.status
        }
        fn initialize(&mut self, _params: &StrategyParams) -> KfResult<()> {
            if self.fail_init {
                return Err(KfError::Internal("bad init".into()));
            }
            self.status = StrategyStatus::Initialized;
            Ok(())
        }
        fn start(&mut self) -> KfResult<()> {
            self.status = StrategyStatus::Running;
            Ok(())
        }
        fn stop(&mut self) -> KfResult<()> {
            self.status = StrategyStatus::Stopped;
            Ok(())
        }
        fn reset(&mut self) {}
        fn update_params(&mut self, _params: &StrategyParams) -> KfResult<()> {
            Ok(())
        }
        fn on_market_event(&mut self, bar: &Bar) -> KfResult<Vec<Signal>> {
            if self.fail_market {
                return Err(KfError::Internal("market handler failed".into()));
            }
            if !self.emit_on_market {
                return Ok(vec![]);
            }
            Ok(vec![Signal::new(
                &self.id,
                bar.symbol.clone(),
                Direction::Buy,
                dec!(0.8),
                bar.close,
                "scripted",
            )])
        }
        fn on_fill_event(&mut self, _fill: &Fill) -> KfResult<()> {
            self.fills_seen += 1;
            Ok(())
        }
        fn on_timer_event(&mut self, _timer: &TimerEvent) -> KfResult<()> {
            self.timers_seen += 1;
            Ok(())
        }
    }

    fn bar(code: &str) -> Bar {
        Bar::new(
            Symbol::shenzhen(code),
            Utc::now(),
            Frequency::Day1,
            dec!(10.00),
            dec!(10.10),
            dec!(9.95),
            dec!(10.00),
            1_000_000,
            dec!(10_000_000),
        )
    }

    fn manager_with_universe(codes: &[&str]) -> Arc<StrategyManager> {
        let bus = Arc::new(EventBus::new(100));
        let manager = StrategyManager::new(bus, 8);
        manager.set_universe(codes.iter().map(|c| Symbol::shenzhen(c)).collect());
        manager
    }

    #[test]
    fn test_register_rejects_duplicates_and_limit() {
        let bus = Arc::new(EventBus::new(100));
        let manager = StrategyManager::new(bus, 2);

        manager
            .register(Box::new(ScriptedStrategy::new("a")), StrategyParams::new("a"))
            .unwrap();
        let duplicate = manager.register(
            Box::new(ScriptedStrategy::new("a")),
            StrategyParams::new("a"),
        );
        assert!(duplicate.is_err());

        manager
            .register(Box::new(ScriptedStrategy::new("b")), StrategyParams::new("b"))
            .unwrap();
        let over_limit = manager.register(
            Box::new(ScriptedStrategy::new("c")),
            StrategyParams::new("c"),
        );
        assert!(over_limit.is_err());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_failed_initialize_is_never_registered() {
        let manager = manager_with_universe(&["000001"]);
        let mut strategy = ScriptedStrategy::new("bad");
        strategy.fail_init = true;
        assert!(manager
            .register(Box::new(strategy), StrategyParams::new("bad"))
            .is_err());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_market_dispatch_honors_watched_symbols() {
        let manager = manager_with_universe(&["000001"]);
        manager
            .register(Box::new(ScriptedStrategy::new("s1")), StrategyParams::new("s1"))
            .unwrap();
        manager.start_all();

        // In-universe symbol is delivered
        manager.handle_event(&Event::market(bar("000001"))).unwrap();
        // Out-of-universe symbol is not
        manager.handle_event(&Event::market(bar("999999"))).unwrap();

        let snapshot = &manager.snapshots()[0];
        assert_eq!(snapshot.received_events, 1);
        assert_eq!(snapshot.signals_generated, 1);
    }

    #[test]
    fn test_not_running_strategy_is_skipped() {
        let manager = manager_with_universe(&["000001"]);
        manager
            .register(Box::new(ScriptedStrategy::new("idle")), StrategyParams::new("idle"))
            .unwrap();
        // Registered but never started
        manager.handle_event(&Event::market(bar("000001"))).unwrap();
        assert_eq!(manager.snapshots()[0].received_events, 0);
    }

    #[test]
    fn test_entry_strategy_not_redelivered_held_symbol() {
        let manager = manager_with_universe(&["000001"]);
        manager
            .register(Box::new(ScriptedStrategy::new("s1")), StrategyParams::new("s1"))
            .unwrap();
        manager.start_all();

        // Attribute a holding to s1; entry strategies then drop the symbol.
        let fees = kf_types::FeeSchedule::default();
        let fill = Fill::new(
            uuid::Uuid::new_v4(),
            Symbol::shenzhen("000001"),
            kf_types::Side::Buy,
            1000,
            dec!(10.00),
            &fees,
            Some("s1".into()),
            true,
        );
        manager.handle_event(&Event::fill(fill)).unwrap();

        manager.handle_event(&Event::market(bar("000001"))).unwrap();
        let snapshot = &manager.snapshots()[0];
        // Only the fill was delivered; the market event was filtered out.
        assert_eq!(snapshot.received_events, 1);
        assert_eq!(snapshot.signals_generated, 0);
        assert_eq!(snapshot.held_symbols, vec!["000001.SZ".to_string()]);
    }

    #[test]
    fn test_fill_routed_only_to_owner() {
        let manager = manager_with_universe(&["000001", "000002"]);
        manager
            .register(Box::new(ScriptedStrategy::new("owner")), StrategyParams::new("o"))
            .unwrap();
        manager
            .register(Box::new(ScriptedStrategy::new("other")), StrategyParams::new("x"))
            .unwrap();
        manager.start_all();

        let fees = kf_types::FeeSchedule::default();
        let fill = Fill::new(
            uuid::Uuid::new_v4(),
            Symbol::shenzhen("000001"),
            kf_types::Side::Buy,
            100,
            dec!(10.00),
            &fees,
            Some("owner".into()),
            true,
        );
        manager.handle_event(&Event::fill(fill)).unwrap();

        let snapshots = manager.snapshots();
        let owner = snapshots.iter().find(|s| s.strategy_id == "owner").unwrap();
        let other = snapshots.iter().find(|s| s.strategy_id == "other").unwrap();
        assert_eq!(owner.received_events, 1);
        assert_eq!(other.received_events, 0);
    }

    #[test]
    fn test_timer_broadcast_to_running() {
        let manager = manager_with_universe(&[]);
        manager
            .register(Box::new(ScriptedStrategy::new("a")), StrategyParams::new("a"))
            .unwrap();
        manager
            .register(Box::new(ScriptedStrategy::new("b")), StrategyParams::new("b"))
            .unwrap();
        manager.start_all();
        manager.stop_strategy("b").unwrap();

        manager
            .handle_event(&Event::timer(kf_types::TimerKind::StrategyTimer, 1000))
            .unwrap();

        let snapshots = manager.snapshots();
        let a = snapshots.iter().find(|s| s.strategy_id == "a").unwrap();
        let b = snapshots.iter().find(|s| s.strategy_id == "b").unwrap();
        assert_eq!(a.received_events, 1);
        assert_eq!(b.received_events, 0);
    }

    #[test]
    fn test_callback_errors_counted_not_fatal() {
        let manager = manager_with_universe(&["000001"]);
        let mut strategy = ScriptedStrategy::new("fragile");
        strategy.fail_market = true;
        manager
            .register(Box::new(strategy), StrategyParams::new("fragile"))
            .unwrap();
        manager.start_all();

        manager.handle_event(&Event::market(bar("000001"))).unwrap();
        manager.handle_event(&Event::market(bar("000001"))).unwrap();

        let snapshot = &manager.snapshots()[0];
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.processed_events, 0);
        // Strategy is still registered and running
        assert_eq!(snapshot.status, "Running");
    }

    #[test]
    fn test_unregister_stops_strategy() {
        let manager = manager_with_universe(&[]);
        manager
            .register(Box::new(ScriptedStrategy::new("gone")), StrategyParams::new("g"))
            .unwrap();
        manager.start_all();
        manager.unregister("gone").unwrap();
        assert!(manager.is_empty());
        assert!(manager.unregister("gone").is_err());
    }
}
