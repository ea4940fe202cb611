use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use kf_engine::EventBus;
use kf_types::{
    Bar, Event, FeeSchedule, Fill, KfResult, Order, OrderAction, OrderEvent, OrderId,
    OrderType, Side, SimulationConfig, Symbol,
};

use crate::handler::{validate_order, ExecutionHandler, OrderTracker};

/// Outcome of pricing an order against the current bar.
enum PriceDecision {
    Execute(Decimal),
    /// Conditions not met yet (untriggered stop); the order keeps resting.
    NotMarketable,
    Reject(&'static str),
}

/// Backtest execution venue with market-microstructure simulation: bar-based
/// conservative pricing, slippage, partial fills, random rejection, and
/// delayed execution.
///
/// The venue keeps its own current-market map, updated by `MARKET` events;
/// each update retries the resting orders of that symbol, so partially
/// filled orders keep filling until done or cancelled.
pub struct SimulatedExecutionHandler {
    bus: Arc<EventBus>,
    tracker: OrderTracker,
    config: SimulationConfig,
    fees: FeeSchedule,
    market: DashMap<Symbol, Bar>,
    rng: Mutex<ChaCha8Rng>,
    weak_self: Weak<Self>,
}

impl SimulatedExecutionHandler {
    pub fn new(bus: Arc<EventBus>, config: SimulationConfig, fees: FeeSchedule) -> Arc<Self> {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Arc::new_cyclic(|weak| Self {
            bus,
            tracker: OrderTracker::new(),
            config,
            fees,
            market: DashMap::new(),
            rng: Mutex::new(rng),
            weak_self: weak.clone(),
        })
    }

    /// Feed the latest bar directly (the bus `MARKET` subscription does the
    /// same thing).
    pub fn update_market(&self, bar: Bar) {
        self.market.insert(bar.symbol.clone(), bar.clone());
        for order in self.tracker.active_for_symbol(&bar.symbol) {
            self.attempt_fill(&order.id);
        }
    }

    pub fn latest_bar(&self, symbol: &Symbol) -> Option<Bar> {
        self.market.get(symbol).map(|bar| bar.value().clone())
    }

    fn publish_order_feedback(&self, order: Order, action: OrderAction) {
        self.bus.publish(Event::order(OrderEvent::new(order, action)));
    }

    fn reject_order(&self, order_id: &OrderId, reason: &str) {
        if let Some(order) = self.tracker.reject(order_id, reason) {
            warn!(order = %order.id, symbol = %order.symbol, reason, "order rejected");
            self.publish_order_feedback(order, OrderAction::Reject);
        }
    }

    /// Conservative bar-based execution pricing.
    fn execution_price(order: &Order, bar: &Bar) -> PriceDecision {
        match order.order_type {
            OrderType::Market => PriceDecision::Execute(match order.side {
                Side::Buy => bar.high,
                Side::Sell => bar.low,
            }),
            OrderType::Limit { price } => match order.side {
                Side::Buy if price < bar.low => PriceDecision::Reject("limit below market"),
                Side::Buy => PriceDecision::Execute(price.min(bar.high)),
                Side::Sell if price > bar.high => PriceDecision::Reject("limit above market"),
                Side::Sell => PriceDecision::Execute(price.max(bar.low)),
            },
            OrderType::Stop { stop_price } => match order.side {
                // Untriggered stops rest until the market reaches them.
                Side::Buy if bar.close >= stop_price => PriceDecision::Execute(bar.close),
                Side::Sell if bar.close <= stop_price => PriceDecision::Execute(bar.close),
                _ => PriceDecision::NotMarketable,
            },
            OrderType::StopLimit {
                stop_price,
                limit_price,
            } => {
                let triggered = match order.side {
                    Side::Buy => bar.close >= stop_price,
                    Side::Sell => bar.close <= stop_price,
                };
                if !triggered {
                    return PriceDecision::NotMarketable;
                }
                match order.side {
                    Side::Buy if limit_price < bar.low => {
                        PriceDecision::Reject("limit below market")
                    }
                    Side::Buy => PriceDecision::Execute(limit_price.min(bar.high)),
                    Side::Sell if limit_price > bar.high => {
                        PriceDecision::Reject("limit above market")
                    }
                    Side::Sell => PriceDecision::Execute(limit_price.max(bar.low)),
                }
            }
        }
    }

    /// `slip = base + (qty / barVolume) * 0.001 + N(0, 0.5 * base)`, clamped
    /// to `[0, max]`; buys pay up, sells give back; price floors at 0.01.
    fn apply_slippage(&self, price: Decimal, side: Side, quantity: i64, bar: &Bar) -> Decimal {
        if !self.config.enable_slippage {
            return price;
        }

        let base = self.config.base_slippage.to_f64().unwrap_or(0.0);
        let max = self.config.max_slippage.to_f64().unwrap_or(0.0);
        let impact = quantity as f64 / bar.volume.max(1) as f64 * 0.001;
        let noise = {
            let mut rng = self.rng.lock();
            // Box-Muller sample with sigma = 0.5 * base
            let u1: f64 = rng.gen::<f64>().max(1e-12);
            let u2: f64 = rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
            z * 0.5 * base
        };

        let slip = (base + impact + noise).clamp(0.0, max);
        let slip = Decimal::try_from(slip).unwrap_or(Decimal::ZERO);
        let adjusted = match side {
            Side::Buy => price * (Decimal::ONE + slip),
            Side::Sell => price * (Decimal::ONE - slip),
        };
        adjusted.max(Decimal::new(1, 2))
    }

    /// Remaining quantity, or a partial slice when the partial-fill dice say
    /// so: `max(1, floor(remaining * (min_ratio + u * (1 - min_ratio))))`.
    fn fill_quantity(&self, remaining: i64) -> i64 {
        if !self.config.enable_partial_fill {
            return remaining;
        }
        let mut rng = self.rng.lock();
        if rng.gen::<f64>() >= self.config.partial_fill_probability {
            return remaining;
        }
        let min_ratio = self.config.min_partial_fill_ratio;
        let ratio = min_ratio + rng.gen::<f64>() * (1.0 - min_ratio);
        ((remaining as f64 * ratio).floor() as i64).max(1)
    }

    /// One fill attempt against the current market.  No-op when the order is
    /// gone or the market says "not yet".
    fn attempt_fill(&self, order_id: &OrderId) {
        let Some(order) = self.tracker.get(order_id) else {
            return;
        };
        let Some(bar) = self.latest_bar(&order.symbol) else {
            self.reject_order(order_id, "missing market data");
            return;
        };

        let raw_price = match Self::execution_price(&order, &bar) {
            PriceDecision::Execute(price) => price,
            PriceDecision::NotMarketable => return,
            PriceDecision::Reject(reason) => {
                self.reject_order(order_id, reason);
                return;
            }
        };

        let quantity = self.fill_quantity(order.remaining_quantity);
        // Impact term scales with the order's full size, not the slice.
        let price = self.apply_slippage(raw_price, order.side, order.quantity, &bar);

        let Some(updated) = self.tracker.apply_fill(order_id, quantity, price) else {
            return;
        };

        let fill = Fill::new(
            updated.id,
            updated.symbol.clone(),
            updated.side,
            quantity,
            price,
            &self.fees,
            updated.strategy_id.clone(),
            true,
        );
        debug!(
            order = %updated.id,
            symbol = %updated.symbol,
            quantity,
            price = %price,
            remaining = updated.remaining_quantity,
            "simulated fill"
        );
        self.bus.publish(Event::fill(fill));
    }

    fn schedule_delayed_fill(&self, order_id: OrderId) {
        let delay_ms = {
            let mut rng = self.rng.lock();
            rng.gen_range(self.config.min_execution_delay_ms..=self.config.max_execution_delay_ms)
        };
        let weak = self.weak_self.clone();
        std::thread::Builder::new()
            .name("kf-sim-delay".to_string())
            .spawn(move || {
                std::thread::sleep(Duration::from_millis(delay_ms));
                if let Some(venue) = weak.upgrade() {
                    venue.attempt_fill(&order_id);
                }
            })
            .ok();
    }
}

impl ExecutionHandler for SimulatedExecutionHandler {
    fn name(&self) -> &str {
        "simulated"
    }

    fn execute_order(&self, order: Order) -> KfResult<()> {
        if let Err(e) = validate_order(&order) {
            let mut rejected = order;
            rejected.reject(&e.to_string());
            warn!(order = %rejected.id, error = %e, "order failed validation");
            self.publish_order_feedback(rejected, OrderAction::Reject);
            return Ok(());
        }

        let order = self.tracker.submit(order);
        info!(
            order = %order.id,
            symbol = %order.symbol,
            side = ?order.side,
            quantity = order.quantity,
            "order accepted by simulated venue"
        );

        if self.config.rejection_probability > 0.0 {
            let roll: f64 = self.rng.lock().gen();
            if roll < self.config.rejection_probability {
                self.reject_order(&order.id, "simulated market rejection");
                return Ok(());
            }
        }

        if self.config.enable_delayed_execution {
            self.schedule_delayed_fill(order.id);
        } else {
            self.attempt_fill(&order.id);
        }
        Ok(())
    }

    fn cancel_order(&self, order_id: OrderId) -> KfResult<bool> {
        // Simulated cancels always succeed for cancellable orders.
        match self.tracker.cancel(&order_id, "cancelled") {
            Some(order) => {
                info!(order = %order.id, "order cancelled");
                self.publish_order_feedback(order, OrderAction::Cancel);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn active_orders(&self) -> Vec<Order> {
        self.tracker.active()
    }
}
