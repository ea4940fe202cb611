//! Reference strategies: a moving-average crossover entry and a
//! stop-loss/take-profit exit.  Both are small enough to serve as templates
//! for user strategies while exercising the full framework contract.

use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use kf_types::{Bar, Direction, Fill, KfResult, Signal, StrategyError, Symbol};

use crate::strategy::{Strategy, StrategyKind, StrategyParams, StrategyStatus};

/// Entry strategy: emits a BUY signal when the short SMA crosses above the
/// long SMA.
pub struct MaCrossStrategy {
    id: String,
    status: StrategyStatus,
    short_period: usize,
    long_period: usize,
    closes: HashMap<Symbol, VecDeque<Decimal>>,
    last_above: HashMap<Symbol, bool>,
}

impl MaCrossStrategy {
    pub fn new(id: &str, short_period: usize, long_period: usize) -> Self {
        Self {
            id: id.to_string(),
            status: StrategyStatus::NotInitialized,
            short_period,
            long_period,
            closes: HashMap::new(),
            last_above: HashMap::new(),
        }
    }

    fn sma(window: &VecDeque<Decimal>, period: usize) -> Option<Decimal> {
        if window.len() < period {
            return None;
        }
        let sum: Decimal = window.iter().rev().take(period).sum();
        Some(sum / Decimal::from(period))
    }

    fn apply_params(&mut self, params: &StrategyParams) -> KfResult<()> {
        if let Some(short) = params.get::<usize>("short_period") {
            self.short_period = short;
        }
        if let Some(long) = params.get::<usize>("long_period") {
            self.long_period = long;
        }
        if self.short_period == 0 || self.short_period >= self.long_period {
            return Err(StrategyError::InvalidConfig {
                message: format!(
                    "short_period {} must be in (0, long_period {})",
                    self.short_period, self.long_period
                ),
            }
            .into());
        }
        Ok(())
    }
}

impl Strategy for MaCrossStrategy {
    fn strategy_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Entry
    }

    fn status(&self) -> StrategyStatus {
        self.status
    }

    fn initialize(&mut self, params: &StrategyParams) -> KfResult<()> {
        self.apply_params(params)?;
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

    fn reset(&mut self) {
        self.closes.clear();
        self.last_above.clear();
        self.status = StrategyStatus::Initialized;
    }

    fn update_params(&mut self, params: &StrategyParams) -> KfResult<()> {
        self.apply_params(params)
    }

    fn on_market_event(&mut self, bar: &Bar) -> KfResult<Vec<Signal>> {
        let window = self.closes.entry(bar.symbol.clone()).or_default();
        window.push_back(bar.close);
        if window.len() > self.long_period + 1 {
            window.pop_front();
        }

        let (Some(short), Some(long)) = (
            Self::sma(window, self.short_period),
            Self::sma(window, self.long_period),
        ) else {
            return Ok(vec![]);
        };

        let above = short > long;
        let was_above = self
            .last_above
            .insert(bar.symbol.clone(), above)
            .unwrap_or(above);

        if above && !was_above {
            // Strength scales with the spread between the averages.
            let spread = (short - long) / long;
            let strength = (spread * Decimal::from(100)).clamp(Decimal::new(3, 1), Decimal::ONE);
            let signal = Signal::new(
                &self.id,
                bar.symbol.clone(),
                Direction::Buy,
                strength,
                bar.close,
                "short SMA crossed above long SMA",
            );
            return Ok(vec![signal]);
        }
        Ok(vec![])
    }
}

/// Exit strategy: watches held symbols and emits SELL signals when the price
/// breaches a stop-loss or take-profit threshold relative to entry cost.
pub struct StopTakeStrategy {
    id: String,
    status: StrategyStatus,
    /// Loss fraction triggering a stop (e.g. 0.05 = -5%).
    stop_loss_pct: Decimal,
    /// Gain fraction triggering a take-profit.
    take_profit_pct: Decimal,
    entries: HashMap<Symbol, EntryLot>,
}

struct EntryLot {
    quantity: i64,
    average_cost: Decimal,
}

impl StopTakeStrategy {
    pub fn new(id: &str, stop_loss_pct: Decimal, take_profit_pct: Decimal) -> Self {
        Self {
            id: id.to_string(),
            status: StrategyStatus::NotInitialized,
            stop_loss_pct,
            take_profit_pct,
            entries: HashMap::new(),
        }
    }

    fn apply_params(&mut self, params: &StrategyParams) -> KfResult<()> {
        if let Some(stop) = params.get::<f64>("stop_loss_pct") {
            self.stop_loss_pct = Decimal::try_from(stop).unwrap_or(self.stop_loss_pct);
        }
        if let Some(take) = params.get::<f64>("take_profit_pct") {
            self.take_profit_pct = Decimal::try_from(take).unwrap_or(self.take_profit_pct);
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.take_profit_pct <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig {
                message: "stop_loss_pct and take_profit_pct must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Strategy for StopTakeStrategy {
    fn strategy_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Exit
    }

    fn status(&self) -> StrategyStatus {
        self.status
    }

    fn initialize(&mut self, params: &StrategyParams) -> KfResult<()> {
        self.apply_params(params)?;
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

    fn reset(&mut self) {
        self.entries.clear();
        self.status = StrategyStatus::Initialized;
    }

    fn update_params(&mut self, params: &StrategyParams) -> KfResult<()> {
        self.apply_params(params)
    }

    fn on_market_event(&mut self, bar: &Bar) -> KfResult<Vec<Signal>> {
        let Some(lot) = self.entries.get(&bar.symbol) else {
            return Ok(vec![]);
        };
        if lot.quantity <= 0 {
            return Ok(vec![]);
        }

        let stop_price = lot.average_cost * (Decimal::ONE - self.stop_loss_pct);
        let take_price = lot.average_cost * (Decimal::ONE + self.take_profit_pct);

        let (reason, strength) = if bar.close <= stop_price {
            ("stop-loss breached", Decimal::ONE)
        } else if bar.close >= take_price {
            ("take-profit reached", Decimal::new(7, 1))
        } else {
            return Ok(vec![]);
        };

        let signal = Signal::new(
            &self.id,
            bar.symbol.clone(),
            Direction::Sell,
            strength,
            bar.close,
            reason,
        )
        .with_suggested_size(Decimal::from(lot.quantity) * bar.close)
        .with_priority(2);
        Ok(vec![signal])
    }

    fn on_fill_event(&mut self, fill: &Fill) -> KfResult<()> {
        let lot = self.entries.entry(fill.symbol.clone()).or_insert(EntryLot {
            quantity: 0,
            average_cost: Decimal::ZERO,
        });

        let delta = fill.signed_quantity();
        if delta > 0 {
            let total = Decimal::from(lot.quantity) * lot.average_cost
                + Decimal::from(delta) * fill.price;
            lot.quantity += delta;
            if lot.quantity > 0 {
                lot.average_cost = total / Decimal::from(lot.quantity);
            }
        } else {
            lot.quantity += delta;
        }

        if lot.quantity <= 0 {
            self.entries.remove(&fill.symbol);
        }
        Ok(())
    }
}
