use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use kf_types::{Bar, Fill, KfResult, Signal, Symbol, TimerEvent};

/// Role of a strategy, which determines its default symbol interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Opens new positions: watches the universe minus what it already holds.
    Entry,
    /// Manages existing positions: watches exactly what it holds.
    Exit,
    /// Catastrophic-stop sweep: watches everything held by any strategy.
    UniversalStop,
}

/// Lifecycle status of a strategy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    NotInitialized,
    Initialized,
    Running,
    Paused,
    Stopped,
    Error,
}

/// Per-strategy configuration: a display name plus free-form parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub name: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

impl StrategyParams {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: HashMap::new(),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> &mut Self {
        self.parameters.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self.parameters.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Symbol sets the framework supplies when computing a strategy's current
/// interest.
#[derive(Debug, Clone, Default)]
pub struct UniverseView {
    /// All tradable symbols.
    pub universe: HashSet<Symbol>,
    /// Symbols currently held by this strategy.
    pub own_holdings: HashSet<Symbol>,
    /// Symbols held by any registered strategy.
    pub all_holdings: HashSet<Symbol>,
}

/// Contract every strategy implements.
///
/// Callbacks run on the strategy manager's worker threads; a strategy is
/// never invoked concurrently with itself for the same event kind, and all
/// errors it returns are absorbed and counted by the framework.
pub trait Strategy: Send + Sync {
    /// Unique, non-empty identifier.
    fn strategy_id(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    fn status(&self) -> StrategyStatus;

    fn initialize(&mut self, params: &StrategyParams) -> KfResult<()>;

    fn start(&mut self) -> KfResult<()>;

    fn stop(&mut self) -> KfResult<()>;

    /// Drop accumulated state, returning to the post-initialize condition.
    fn reset(&mut self);

    /// Hot configuration update while registered.
    fn update_params(&mut self, params: &StrategyParams) -> KfResult<()>;

    /// The dynamic set of symbols of interest right now.  The default
    /// derives it from the strategy kind.
    fn watched_symbols(&self, view: &UniverseView) -> HashSet<Symbol> {
        match self.kind() {
            StrategyKind::Entry => view
                .universe
                .difference(&view.own_holdings)
                .cloned()
                .collect(),
            StrategyKind::Exit => view.own_holdings.clone(),
            StrategyKind::UniversalStop => view.all_holdings.clone(),
        }
    }

    /// React to a market bar with zero or more signals.
    fn on_market_event(&mut self, bar: &Bar) -> KfResult<Vec<Signal>>;

    /// Bookkeeping for fills attributed to this strategy.
    fn on_fill_event(&mut self, _fill: &Fill) -> KfResult<()> {
        Ok(())
    }

    /// Periodic housekeeping hook.
    fn on_timer_event(&mut self, _timer: &TimerEvent) -> KfResult<()> {
        Ok(())
    }
}
