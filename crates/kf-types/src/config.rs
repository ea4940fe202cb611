use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::KfResult;
use crate::fills::FeeSchedule;
use crate::market::Frequency;

/// Operating mode of the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Live,
}

/// Event-engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Soft capacity of the main priority queue.
    pub queue_capacity: usize,
    /// Worker threads for the async runtime (None = number of cores).
    pub worker_threads: Option<usize>,
    /// Dispatcher / worker poll timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            worker_threads: None,
            timeout_ms: 100,
        }
    }
}

/// Account bootstrap parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountConfig {
    pub account_id: String,
    pub initial_capital: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_id: "default".to_string(),
            initial_capital: Decimal::from(1_000_000),
        }
    }
}

/// Portfolio sizing and exposure limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortfolioConfig {
    /// Max market value of a single position as a fraction of total assets.
    pub max_position_percent: Decimal,
    /// Max total position value as a fraction of total assets.
    pub max_total_position_percent: Decimal,
    /// Orders below this gross amount are rejected.
    pub min_order_amount: Decimal,
    /// Sizing strategy; only `fixed_amount` is implemented, the field is
    /// reserved for future methods.
    pub position_size_method: String,
    /// Gross amount per order under `fixed_amount` sizing.
    pub default_position_size: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            max_position_percent: Decimal::new(1, 1),        // 10%
            max_total_position_percent: Decimal::new(8, 1),  // 80%
            min_order_amount: Decimal::from(1_000),
            position_size_method: "fixed_amount".to_string(),
            default_position_size: Decimal::from(10_000),
        }
    }
}

/// Daily risk limits evaluated per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiskConfig {
    pub max_daily_loss_percent: Decimal,
    pub max_drawdown_percent: Decimal,
    /// Reserved; stored but not evaluated.
    pub max_correlation: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_percent: Decimal::new(5, 2), // 5%
            max_drawdown_percent: Decimal::new(2, 1),   // 20%
            max_correlation: Decimal::new(8, 1),        // 80%
        }
    }
}

/// Which execution handler to wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Simulated,
    Live,
}

/// Market-microstructure simulation knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    pub base_slippage: Decimal,
    pub max_slippage: Decimal,
    pub enable_slippage: bool,
    pub partial_fill_probability: f64,
    pub min_partial_fill_ratio: f64,
    pub enable_partial_fill: bool,
    pub rejection_probability: f64,
    pub min_execution_delay_ms: u64,
    pub max_execution_delay_ms: u64,
    pub enable_delayed_execution: bool,
    /// Fixed seed for reproducible simulations; None = entropy.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_slippage: Decimal::new(5, 4), // 0.05%
            max_slippage: Decimal::new(1, 2),  // 1%
            enable_slippage: false,
            partial_fill_probability: 0.2,
            min_partial_fill_ratio: 0.3,
            enable_partial_fill: false,
            rejection_probability: 0.0,
            min_execution_delay_ms: 10,
            max_execution_delay_ms: 100,
            enable_delayed_execution: false,
            rng_seed: None,
        }
    }
}

/// Live-broker connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    pub endpoint: String,
    pub account: String,
    #[serde(default = "default_broker_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_broker_timeout_ms() -> u64 {
    5_000
}

/// Execution handler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(rename = "type")]
    pub kind: ExecutionKind,
    pub simulation: SimulationConfig,
    /// Commission-rate overrides for fill fee computation.
    pub fees: FeeSchedule,
    pub max_retry_count: u32,
    pub broker: Option<BrokerConfig>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            kind: ExecutionKind::Simulated,
            simulation: SimulationConfig::default(),
            fees: FeeSchedule::default(),
            max_retry_count: 3,
            broker: None,
        }
    }
}

/// Strategy-framework limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyConfig {
    pub max_strategies: usize,
    pub signal_timeout_seconds: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_strategies: 32,
            signal_timeout_seconds: 300,
        }
    }
}

/// Backtest window and universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BacktestConfig {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub universe: Vec<String>,
    pub frequency: Frequency,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            universe: Vec::new(),
            frequency: Frequency::Day1,
        }
    }
}

/// Data-layer locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataConfig {
    /// Root of the columnar kline archive.
    pub root_path: String,
    /// Days of history preloaded before the backtest window.
    pub preload_days: u32,
    /// CSV catalog locations (trading calendar, stock info, universe).
    pub calendar_path: Option<String>,
    pub stock_info_path: Option<String>,
    pub universe_path: Option<String>,
    /// Storage-engine connection strings, keyed by engine name.
    pub connections: HashMap<String, String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root_path: "./data".to_string(),
            preload_days: 60,
            calendar_path: None,
            stock_info_path: None,
            universe_path: None,
            connections: HashMap::new(),
        }
    }
}

/// Timer recurrence intervals, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerConfig {
    pub market_data_update_ms: u64,
    pub risk_check_ms: u64,
    pub heartbeat_ms: u64,
    pub cleanup_ms: u64,
    pub strategy_timer_ms: u64,
    pub portfolio_rebalance_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            market_data_update_ms: 1_000,
            risk_check_ms: 5_000,
            heartbeat_ms: 30_000,
            cleanup_ms: 60_000,
            strategy_timer_ms: 10_000,
            portfolio_rebalance_ms: 60_000,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub mode: RunMode,
    pub engine: EngineConfig,
    pub account: AccountConfig,
    pub portfolio: PortfolioConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub strategy: StrategyConfig,
    pub backtest: BacktestConfig,
    pub data: DataConfig,
    pub timers: TimerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Backtest,
            engine: EngineConfig::default(),
            account: AccountConfig::default(),
            portfolio: PortfolioConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            strategy: StrategyConfig::default(),
            backtest: BacktestConfig::default(),
            data: DataConfig::default(),
            timers: TimerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Field-by-field validation applied after loading.
    pub fn validate(&self) -> KfResult<()> {
        if self.engine.queue_capacity == 0 {
            return Err(crate::config_error!("engine.queueCapacity must be > 0"));
        }
        if self.account.initial_capital <= Decimal::ZERO {
            return Err(crate::config_error!(
                "account.initialCapital must be positive, got {}",
                self.account.initial_capital
            ));
        }
        if self.account.account_id.is_empty() {
            return Err(crate::config_error!("account.accountId must not be empty"));
        }

        for (name, value) in [
            ("portfolio.maxPositionPercent", self.portfolio.max_position_percent),
            (
                "portfolio.maxTotalPositionPercent",
                self.portfolio.max_total_position_percent,
            ),
            ("risk.maxDailyLossPercent", self.risk.max_daily_loss_percent),
            ("risk.maxDrawdownPercent", self.risk.max_drawdown_percent),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(crate::config_error!("{name} must be in (0, 1], got {value}"));
            }
        }

        if self.portfolio.position_size_method != "fixed_amount" {
            return Err(crate::config_error!(
                "portfolio.positionSizeMethod '{}' is not supported (only fixed_amount)",
                self.portfolio.position_size_method
            ));
        }
        if self.portfolio.default_position_size <= Decimal::ZERO {
            return Err(crate::config_error!(
                "portfolio.defaultPositionSize must be positive"
            ));
        }

        let sim = &self.execution.simulation;
        for (name, p) in [
            ("execution.simulation.partialFillProbability", sim.partial_fill_probability),
            ("execution.simulation.minPartialFillRatio", sim.min_partial_fill_ratio),
            ("execution.simulation.rejectionProbability", sim.rejection_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(crate::config_error!("{name} must be in [0, 1], got {p}"));
            }
        }
        if sim.min_execution_delay_ms > sim.max_execution_delay_ms {
            return Err(crate::config_error!(
                "execution.simulation delay range is inverted: {} > {}",
                sim.min_execution_delay_ms,
                sim.max_execution_delay_ms
            ));
        }

        if self.execution.kind == ExecutionKind::Live && self.execution.broker.is_none() {
            return Err(crate::config_error!(
                "execution.type = live requires an execution.broker section"
            ));
        }

        if self.strategy.max_strategies == 0 {
            return Err(crate::config_error!("strategy.maxStrategies must be > 0"));
        }

        if let (Some(start), Some(end)) = (self.backtest.start_date, self.backtest.end_date) {
            if start > end {
                return Err(crate::config_error!(
                    "backtest.startDate {start} is after backtest.endDate {end}"
                ));
            }
        }

        Ok(())
    }
}
