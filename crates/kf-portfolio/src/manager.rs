use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use kf_engine::{EventBus, EventHandler};
use kf_types::{
    Account, Direction, Event, EventKind, EventPayload, Fill, KfResult, Order, OrderAction,
    OrderEvent, PortfolioConfig, RiskConfig, RiskError, Signal, Symbol, TimerEvent, TimerKind,
};

use crate::risk::{RiskStatus, RISK_LIMIT_TRIGGERED};
use crate::sizing;

/// Serializable counters and account highlights for operator diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub total_signals: u64,
    pub passed_signals: u64,
    pub rejected_signals: u64,
    pub generated_orders: u64,
    pub cash: Decimal,
    pub frozen_cash: Decimal,
    pub position_count: usize,
    pub total_realized_pnl: Decimal,
    pub blocked_symbols: Vec<String>,
}

/// Consumes signals, gates them through pre-trade risk, sizes and emits
/// orders, and maintains the account from fills.
///
/// Subscribes to `SIGNAL`, `FILL`, `TIMER`, and `ORDER` (the latter only for
/// cancel/reject feedback that releases frozen cash).
pub struct PortfolioRiskManager {
    bus: Arc<EventBus>,
    account: Mutex<Account>,
    config: PortfolioConfig,
    risk_config: RiskConfig,
    risk: DashMap<Symbol, RiskStatus>,
    /// Last reference price seen per symbol (signals and fills).
    reference_prices: DashMap<Symbol, Decimal>,
    total_signals: AtomicU64,
    passed_signals: AtomicU64,
    rejected_signals: AtomicU64,
    generated_orders: AtomicU64,
}

impl PortfolioRiskManager {
    pub fn new(
        bus: Arc<EventBus>,
        account: Account,
        config: PortfolioConfig,
        risk_config: RiskConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            account: Mutex::new(account),
            config,
            risk_config,
            risk: DashMap::new(),
            reference_prices: DashMap::new(),
            total_signals: AtomicU64::new(0),
            passed_signals: AtomicU64::new(0),
            rejected_signals: AtomicU64::new(0),
            generated_orders: AtomicU64::new(0),
        })
    }

    /// Subscribe to the event kinds this manager consumes.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> KfResult<()> {
        for kind in [
            EventKind::Signal,
            EventKind::Fill,
            EventKind::Timer,
            EventKind::Order,
        ] {
            bus.register(kind, Arc::clone(self) as Arc<dyn EventHandler>)?;
        }
        Ok(())
    }

    /// Clone of the current account state.
    pub fn account_snapshot(&self) -> Account {
        self.account.lock().clone()
    }

    pub fn stats(&self) -> PortfolioStats {
        let account = self.account.lock();
        let mut blocked: Vec<String> = self
            .risk
            .iter()
            .filter(|entry| entry.is_blocked)
            .map(|entry| entry.key().to_string())
            .collect();
        blocked.sort();

        PortfolioStats {
            total_signals: self.total_signals.load(Ordering::Relaxed),
            passed_signals: self.passed_signals.load(Ordering::Relaxed),
            rejected_signals: self.rejected_signals.load(Ordering::Relaxed),
            generated_orders: self.generated_orders.load(Ordering::Relaxed),
            cash: account.cash,
            frozen_cash: account.frozen_cash,
            position_count: account.positions.len(),
            total_realized_pnl: account.total_realized_pnl,
            blocked_symbols: blocked,
        }
    }

    /// Manually block a symbol (operator override); the sweep uses the same
    /// path.
    pub fn block_symbol(&self, symbol: &Symbol, reason: &str) {
        self.risk
            .entry(symbol.clone())
            .or_insert_with(|| RiskStatus::new(symbol.clone()))
            .block(reason);
    }

    /// Start-of-day reset of all per-symbol risk state.
    pub fn reset_daily_risk(&self) {
        for mut entry in self.risk.iter_mut() {
            entry.reset_daily();
        }
    }

    fn snapshot_prices(&self) -> HashMap<Symbol, Decimal> {
        self.reference_prices
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    // -- signal pipeline ----------------------------------------------------

    /// Run the full gating pipeline for one signal, returning the order it
    /// produces or the rejection.
    fn evaluate_signal(&self, signal: &Signal) -> KfResult<Order> {
        // 1) Validity and expiry
        if !signal.is_valid() {
            return Err(RiskError::InvalidSignal {
                message: format!("signal {} failed validity check", signal.id),
            }
            .into());
        }
        if signal.is_expired(chrono::Utc::now()) {
            return Err(RiskError::SignalExpired {
                expired_at: signal.expires_at().to_rfc3339(),
            }
            .into());
        }
        let side = match signal.direction {
            Direction::Buy => kf_types::Side::Buy,
            Direction::Sell => kf_types::Side::Sell,
            Direction::Hold => {
                return Err(RiskError::InvalidSignal {
                    message: "hold signals do not generate orders".to_string(),
                }
                .into())
            }
        };

        // 2) Per-symbol block
        if let Some(status) = self.risk.get(&signal.symbol) {
            if status.is_blocked {
                return Err(RiskError::SymbolBlocked {
                    symbol: signal.symbol.to_string(),
                    reason: status
                        .block_reason
                        .clone()
                        .unwrap_or_else(|| "blocked".to_string()),
                }
                .into());
            }
        }

        self.reference_prices
            .insert(signal.symbol.clone(), signal.reference_price);
        let prices = self.snapshot_prices();

        let account = self.account.lock();
        let total_assets = account.total_market_value(&prices);

        // 3) Position limits (buys only; sells reduce exposure)
        if side == kf_types::Side::Buy && total_assets > Decimal::ZERO {
            let position_value = account
                .position(&signal.symbol)
                .map(|p| {
                    let price = prices
                        .get(&signal.symbol)
                        .copied()
                        .unwrap_or(p.average_cost);
                    p.market_value(price)
                })
                .unwrap_or(Decimal::ZERO);

            if position_value / total_assets >= self.config.max_position_percent {
                return Err(RiskError::PositionLimit {
                    message: format!(
                        "position in {} is {:.4} of assets, limit {}",
                        signal.symbol,
                        position_value / total_assets,
                        self.config.max_position_percent
                    ),
                }
                .into());
            }

            let total_position_value = total_assets - account.cash;
            if total_position_value / total_assets >= self.config.max_total_position_percent {
                return Err(RiskError::PositionLimit {
                    message: format!(
                        "total position value {:.4} of assets, limit {}",
                        total_position_value / total_assets,
                        self.config.max_total_position_percent
                    ),
                }
                .into());
            }
        }

        // 4) Sizing and cash check
        let amount = sizing::order_amount(signal, self.config.default_position_size);
        if side == kf_types::Side::Buy {
            if amount < self.config.min_order_amount {
                return Err(RiskError::BelowMinOrderAmount {
                    amount,
                    minimum: self.config.min_order_amount,
                }
                .into());
            }
            if amount > account.available_cash() {
                return Err(RiskError::InsufficientCash {
                    required: amount,
                    available: account.available_cash(),
                }
                .into());
            }
        }

        // 5) Daily loss / drawdown
        if let Some(status) = self.risk.get(&signal.symbol) {
            let loss_floor = -self.risk_config.max_daily_loss_percent * total_assets;
            if status.daily_pnl < loss_floor {
                return Err(RiskError::DailyLimit {
                    message: format!(
                        "daily pnl {} below floor {} for {}",
                        status.daily_pnl, loss_floor, signal.symbol
                    ),
                }
                .into());
            }
            if status.max_drawdown > self.risk_config.max_drawdown_percent {
                return Err(RiskError::DailyLimit {
                    message: format!(
                        "drawdown {} exceeds limit {} for {}",
                        status.max_drawdown, self.risk_config.max_drawdown_percent, signal.symbol
                    ),
                }
                .into());
            }
        }

        // 6/7) Whole-lot quantity and order construction
        let mut quantity = sizing::lot_quantity(amount, signal.reference_price);
        if side == kf_types::Side::Sell {
            let held = account
                .position(&signal.symbol)
                .map(|p| p.quantity)
                .unwrap_or(0);
            if held <= 0 {
                return Err(RiskError::PositionLimit {
                    message: format!("no position in {} to sell", signal.symbol),
                }
                .into());
            }
            quantity = quantity.min(held);
        }
        if quantity <= 0 {
            return Err(RiskError::ZeroQuantity {
                amount,
                price: signal.reference_price,
            }
            .into());
        }

        let order = Order::limit_order(signal.symbol.clone(), side, quantity, signal.reference_price)
            .with_signal(signal.id, &signal.strategy_id)
            .with_tag(&signal.reason);
        Ok(order)
    }

    fn handle_signal(&self, signal: &Signal) {
        self.total_signals.fetch_add(1, Ordering::Relaxed);

        match self.evaluate_signal(signal) {
            Ok(order) => {
                // Reserve cash for buys before the order leaves.
                if order.is_buy() {
                    let reserve = Decimal::from(order.quantity) * signal.reference_price;
                    let mut account = self.account.lock();
                    if let Err(e) = account.freeze_cash(reserve) {
                        drop(account);
                        self.rejected_signals.fetch_add(1, Ordering::Relaxed);
                        warn!(signal = %signal.id, error = %e, "cash freeze failed; signal rejected");
                        return;
                    }
                    account.record_order(order.clone());
                } else {
                    self.account.lock().record_order(order.clone());
                }

                self.passed_signals.fetch_add(1, Ordering::Relaxed);
                self.generated_orders.fetch_add(1, Ordering::Relaxed);
                info!(
                    signal = %signal.id,
                    order = %order.id,
                    symbol = %order.symbol,
                    side = ?order.side,
                    quantity = order.quantity,
                    "signal passed risk checks; order emitted"
                );
                self.bus
                    .publish(Event::order(OrderEvent::new(order, OrderAction::New)));
            }
            Err(e) => {
                self.rejected_signals.fetch_add(1, Ordering::Relaxed);
                warn!(
                    signal = %signal.id,
                    strategy = %signal.strategy_id,
                    symbol = %signal.symbol,
                    reason = %e,
                    "signal rejected"
                );
            }
        }
    }

    // -- fill handling ------------------------------------------------------

    fn handle_fill(&self, fill: &Fill) {
        self.reference_prices
            .insert(fill.symbol.clone(), fill.price);
        let prices = self.snapshot_prices();

        let (pnl_delta, total_assets) = {
            let mut account = self.account.lock();

            // Release the reservation made at order time for buys.
            if fill.side == kf_types::Side::Buy {
                let reserved_price = account
                    .orders
                    .get(&fill.order_id)
                    .and_then(|o| o.limit_price())
                    .unwrap_or(fill.price);
                account.unfreeze_cash(Decimal::from(fill.quantity) * reserved_price);
            }

            let realized_before = account.total_realized_pnl;
            account.apply_fill(fill);
            if let Some(order) = account.orders.get_mut(&fill.order_id) {
                order.apply_fill(fill.quantity, fill.price);
            }
            let pnl_delta = account.total_realized_pnl - realized_before - fill.total_fee;
            (pnl_delta, account.total_market_value(&prices))
        };

        self.risk
            .entry(fill.symbol.clone())
            .or_insert_with(|| RiskStatus::new(fill.symbol.clone()))
            .record_pnl(pnl_delta, total_assets, fill.executed_at);

        debug!(
            order = %fill.order_id,
            symbol = %fill.symbol,
            quantity = fill.quantity,
            price = %fill.price,
            net = %fill.net_amount,
            "fill applied to account"
        );
    }

    // -- order feedback -----------------------------------------------------

    /// Cancel/reject feedback: release any cash still reserved for the
    /// unfilled remainder of a buy order.
    fn handle_order_feedback(&self, event: &OrderEvent) {
        if !matches!(event.action, OrderAction::Cancel | OrderAction::Reject) {
            return;
        }

        let mut account = self.account.lock();
        if event.order.is_buy() {
            if let Some(price) = event.order.limit_price() {
                let remainder = Decimal::from(event.order.remaining_quantity) * price;
                if remainder > Decimal::ZERO {
                    account.unfreeze_cash(remainder);
                }
            }
        }
        account.update_order(event.order.clone());
    }

    // -- periodic sweep -----------------------------------------------------

    fn risk_sweep(&self) {
        let prices = self.snapshot_prices();
        let total_assets = self.account.lock().total_market_value(&prices);
        if total_assets <= Decimal::ZERO {
            return;
        }

        let loss_floor = -self.risk_config.max_daily_loss_percent * total_assets;
        for mut entry in self.risk.iter_mut() {
            if entry.is_blocked {
                continue;
            }
            let breached = entry.daily_pnl < loss_floor
                || entry.max_drawdown > self.risk_config.max_drawdown_percent;
            if breached {
                warn!(
                    symbol = %entry.key(),
                    daily_pnl = %entry.daily_pnl,
                    max_drawdown = %entry.max_drawdown,
                    "risk sweep blocked symbol"
                );
                entry.block(RISK_LIMIT_TRIGGERED);
            }
        }
    }

    fn handle_timer(&self, timer: &TimerEvent) {
        if timer.kind == TimerKind::RiskCheck {
            self.risk_sweep();
        }
    }
}

impl EventHandler for PortfolioRiskManager {
    fn name(&self) -> &str {
        "portfolio-risk-manager"
    }

    fn handle_event(&self, event: &Event) -> KfResult<()> {
        match &event.payload {
            EventPayload::Signal(signal_event) => self.handle_signal(&signal_event.signal),
            EventPayload::Fill(fill) => self.handle_fill(fill),
            EventPayload::Order(order_event) => self.handle_order_feedback(order_event),
            EventPayload::Timer(timer) => self.handle_timer(timer),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_types::{FeeSchedule, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn test_symbol() -> Symbol {
        Symbol::shenzhen("000001")
    }

    fn manager() -> Arc<PortfolioRiskManager> {
        manager_with(PortfolioConfig::default(), RiskConfig::default(), dec!(1_000_000))
    }

    fn manager_with(
        config: PortfolioConfig,
        risk_config: RiskConfig,
        capital: Decimal,
    ) -> Arc<PortfolioRiskManager> {
        let bus = Arc::new(EventBus::new(100));
        let account = Account::new("test", capital).unwrap();
        PortfolioRiskManager::new(bus, account, config, risk_config)
    }

    fn buy_signal(price: Decimal) -> Signal {
        Signal::new("s1", test_symbol(), Direction::Buy, dec!(0.8), price, "test")
    }

    fn fill_for(order: &Order, quantity: i64, price: Decimal) -> Fill {
        Fill::new(
            order.id,
            order.symbol.clone(),
            order.side,
            quantity,
            price,
            &FeeSchedule::default(),
            order.strategy_id.clone(),
            true,
        )
    }

    #[test]
    fn test_happy_path_buy_order_sizing() {
        let m = manager();
        let order = m.evaluate_signal(&buy_signal(dec!(10.00))).unwrap();

        // 10,000 / 10.00 / 100 lots = 1000 shares at the reference price
        assert_eq!(order.quantity, 1000);
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.limit_price(), Some(dec!(10.00)));
        assert_eq!(order.strategy_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_signal_counters() {
        let m = manager();
        m.handle_signal(&buy_signal(dec!(10.00)));
        let mut expired = buy_signal(dec!(10.00));
        expired.timestamp = chrono::Utc::now() - chrono::Duration::seconds(600);
        m.handle_signal(&expired);

        let stats = m.stats();
        assert_eq!(stats.total_signals, 2);
        assert_eq!(stats.passed_signals, 1);
        assert_eq!(stats.rejected_signals, 1);
        assert_eq!(stats.generated_orders, 1);
        // Cash frozen for the emitted order
        assert_eq!(stats.frozen_cash, dec!(10_000.00));
    }

    #[test]
    fn test_invalid_signal_rejected() {
        let m = manager();
        let mut signal = buy_signal(dec!(10.00));
        signal.strategy_id.clear();
        assert!(m.evaluate_signal(&signal).is_err());
    }

    #[test]
    fn test_hold_signal_rejected() {
        let m = manager();
        let signal = Signal::new(
            "s1",
            test_symbol(),
            Direction::Hold,
            dec!(0.5),
            dec!(10.00),
            "hold",
        );
        assert!(m.evaluate_signal(&signal).is_err());
    }

    #[test]
    fn test_blocked_symbol_rejected() {
        let m = manager();
        m.block_symbol(&test_symbol(), "manual block");
        let err = m.evaluate_signal(&buy_signal(dec!(10.00))).unwrap_err();
        assert!(err.to_string().contains("manual block"));
    }

    #[test]
    fn test_position_limit_rejects_oversized() {
        // Account with an existing position worth 6% against a 5% limit.
        let config = PortfolioConfig {
            max_position_percent: dec!(0.05),
            ..Default::default()
        };
        let m = manager_with(config, RiskConfig::default(), dec!(1_000_000));

        // Seed a 6,000-share position at 10.00 = 60,000 (6% of ~1M)
        let order = Order::limit_order(test_symbol(), Side::Buy, 6000, dec!(10.00));
        m.account.lock().record_order(order.clone());
        m.handle_fill(&fill_for(&order, 6000, dec!(10.00)));

        let err = m.evaluate_signal(&buy_signal(dec!(10.00))).unwrap_err();
        assert!(matches!(
            err,
            kf_types::KfError::Risk(RiskError::PositionLimit { .. })
        ));

        m.handle_signal(&buy_signal(dec!(10.00)));
        assert_eq!(m.stats().rejected_signals, 1);
    }

    #[test]
    fn test_min_amount_and_cash_checks() {
        let config = PortfolioConfig {
            min_order_amount: dec!(5_000),
            default_position_size: dec!(1_000),
            ..Default::default()
        };
        let m = manager_with(config, RiskConfig::default(), dec!(1_000_000));
        let err = m.evaluate_signal(&buy_signal(dec!(10.00))).unwrap_err();
        assert!(matches!(
            err,
            kf_types::KfError::Risk(RiskError::BelowMinOrderAmount { .. })
        ));

        let config = PortfolioConfig {
            default_position_size: dec!(50_000),
            ..Default::default()
        };
        let m = manager_with(config, RiskConfig::default(), dec!(20_000));
        let err = m.evaluate_signal(&buy_signal(dec!(10.00))).unwrap_err();
        assert!(matches!(
            err,
            kf_types::KfError::Risk(RiskError::InsufficientCash { .. })
        ));
    }

    #[test]
    fn test_sell_requires_position_and_caps_quantity() {
        let m = manager();
        let sell = Signal::new(
            "s1",
            test_symbol(),
            Direction::Sell,
            dec!(0.9),
            dec!(10.00),
            "exit",
        );
        assert!(m.evaluate_signal(&sell).is_err());

        // Hold 300 shares; a default-sized sell is capped at the holding.
        let order = Order::limit_order(test_symbol(), Side::Buy, 300, dec!(10.00));
        m.account.lock().record_order(order.clone());
        m.handle_fill(&fill_for(&order, 300, dec!(10.00)));

        let order = m.evaluate_signal(&sell).unwrap();
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.quantity, 300);
    }

    #[test]
    fn test_fill_updates_account_and_risk() {
        let m = manager();
        m.handle_signal(&buy_signal(dec!(10.00)));
        let order = {
            let account = m.account.lock();
            account.orders.values().next().unwrap().clone()
        };

        m.handle_fill(&fill_for(&order, 1000, dec!(10.00)));

        let account = m.account_snapshot();
        assert_eq!(account.position(&test_symbol()).unwrap().quantity, 1000);
        // Freeze fully released by the fill
        assert_eq!(account.frozen_cash, Decimal::ZERO);
        assert!(account.is_healthy());
        // Order bookkeeping followed the fill
        let recorded = account.orders.get(&order.id).unwrap();
        assert_eq!(recorded.filled_quantity, 1000);
        assert_eq!(recorded.remaining_quantity, 0);

        let risk = m.risk.get(&test_symbol()).unwrap();
        assert!(risk.last_trade_time.is_some());
        // Buy realizes no P&L; only fees flow through
        assert!(risk.daily_pnl < Decimal::ZERO);
    }

    #[test]
    fn test_cancel_feedback_releases_freeze() {
        let m = manager();
        m.handle_signal(&buy_signal(dec!(10.00)));
        let mut order = {
            let account = m.account.lock();
            account.orders.values().next().unwrap().clone()
        };
        assert_eq!(m.account_snapshot().frozen_cash, dec!(10_000.00));

        order.cancel("venue cancelled");
        m.handle_order_feedback(&OrderEvent::new(order, OrderAction::Cancel));
        assert_eq!(m.account_snapshot().frozen_cash, Decimal::ZERO);
    }

    #[test]
    fn test_risk_sweep_blocks_breached_symbol() {
        let risk_config = RiskConfig {
            max_daily_loss_percent: dec!(0.01),
            ..Default::default()
        };
        let m = manager_with(PortfolioConfig::default(), risk_config, dec!(1_000_000));

        // Record a painful realized loss on the symbol.
        m.risk
            .entry(test_symbol())
            .or_insert_with(|| RiskStatus::new(test_symbol()))
            .record_pnl(dec!(-50_000), dec!(1_000_000), chrono::Utc::now());
        m.reference_prices.insert(test_symbol(), dec!(10.00));

        m.risk_sweep();

        let status = m.risk.get(&test_symbol()).unwrap();
        assert!(status.is_blocked);
        assert_eq!(status.block_reason.as_deref(), Some(RISK_LIMIT_TRIGGERED));

        // Subsequent signals are rejected by the block.
        assert!(m.evaluate_signal(&buy_signal(dec!(10.00))).is_err());
    }

    #[test]
    fn test_daily_reset_unblocks() {
        let m = manager();
        m.block_symbol(&test_symbol(), RISK_LIMIT_TRIGGERED);
        m.reset_daily_risk();
        assert!(m.evaluate_signal(&buy_signal(dec!(10.00))).is_ok());
    }
}
