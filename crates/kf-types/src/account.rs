use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::{KfResult, RiskError};
use crate::fills::Fill;
use crate::market::Symbol;
use crate::orders::{Order, OrderId, Side};

/// Net holding in a symbol with average cost basis.
///
/// Quantity is signed: positive = long, negative = short.  Flat positions are
/// removed from the owning account rather than stored at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub strategy_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(symbol: Symbol, strategy_id: Option<String>) -> Self {
        Self {
            symbol,
            quantity: 0,
            average_cost: Decimal::ZERO,
            strategy_id,
            updated_at: Utc::now(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Apply a signed quantity delta executed at `price`.
    ///
    /// Same-sign deltas re-average the cost basis; opposite-sign deltas that
    /// stay within the current size keep it; reversing through zero resets
    /// the basis to the execution price.
    pub fn apply(&mut self, delta: i64, price: Decimal) {
        if delta == 0 {
            return;
        }

        let q = self.quantity;
        let new_q = q + delta;

        if q == 0 || q.signum() == delta.signum() {
            // Opening or adding
            let total_cost = Decimal::from(q.abs()) * self.average_cost
                + Decimal::from(delta.abs()) * price;
            if new_q != 0 {
                self.average_cost = total_cost / Decimal::from(new_q.abs());
            }
        } else if delta.abs() > q.abs() {
            // Reversing through zero: basis restarts at the execution price
            self.average_cost = price;
        }
        // Reducing within the current size keeps the basis unchanged.

        self.quantity = new_q;
        if self.quantity == 0 {
            self.average_cost = Decimal::ZERO;
        }
        self.updated_at = Utc::now();
    }

    /// Market value at `price`; shorts are valued by absolute size.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        Decimal::from(self.quantity.abs()) * price
    }
}

/// Status of a completed or in-progress round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    PartiallyClosed,
    Closed,
}

/// Informational round-trip aggregation built from fills.
///
/// Not the authoritative P&L ledger; that is cash plus position valuation
/// on the account itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: Symbol,
    pub strategy_id: Option<String>,
    /// Direction of the opening fill.
    pub side: Side,
    pub open_quantity: i64,
    pub open_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_quantity: i64,
    pub close_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    pub status: TradeStatus,
}

impl Trade {
    fn open(fill: &Fill, quantity: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: fill.symbol.clone(),
            strategy_id: fill.strategy_id.clone(),
            side: fill.side,
            open_quantity: quantity,
            open_price: fill.price,
            opened_at: fill.executed_at,
            closed_quantity: 0,
            close_price: None,
            closed_at: None,
            realized_pnl: Decimal::ZERO,
            fees: fill.total_fee,
            status: TradeStatus::Open,
        }
    }

    fn extend(&mut self, fill: &Fill, quantity: i64) {
        let total = Decimal::from(self.open_quantity) * self.open_price
            + Decimal::from(quantity) * fill.price;
        self.open_quantity += quantity;
        self.open_price = total / Decimal::from(self.open_quantity);
        self.fees += fill.total_fee;
    }

    fn close(&mut self, fill: &Fill, quantity: i64) {
        let prev_closed = Decimal::from(self.closed_quantity);
        let weighted = match self.close_price {
            Some(p) => (p * prev_closed + fill.price * Decimal::from(quantity))
                / (prev_closed + Decimal::from(quantity)),
            None => fill.price,
        };
        self.closed_quantity += quantity;
        self.close_price = Some(weighted);
        self.fees += fill.total_fee;

        let qty = Decimal::from(quantity);
        self.realized_pnl += match self.side {
            Side::Buy => (fill.price - self.open_price) * qty,
            Side::Sell => (self.open_price - fill.price) * qty,
        };

        if self.closed_quantity >= self.open_quantity {
            self.status = TradeStatus::Closed;
            self.closed_at = Some(fill.executed_at);
        } else {
            self.status = TradeStatus::PartiallyClosed;
        }
    }
}

/// Trading account: cash, frozen cash, positions, order/fill history.
///
/// Positions and cash are mutated only through [`Account::apply_fill`] and
/// the freeze/unfreeze pair; callers serialize access per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub frozen_cash: Decimal,
    pub positions: HashMap<Symbol, Position>,
    pub orders: HashMap<OrderId, Order>,
    pub fills: Vec<Fill>,
    pub trades: Vec<Trade>,
    #[serde(skip)]
    open_trades: HashMap<Symbol, Trade>,
    pub total_commission: Decimal,
    pub total_realized_pnl: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: &str, initial_capital: Decimal) -> KfResult<Self> {
        if initial_capital <= Decimal::ZERO {
            return Err(crate::validation_error!(
                "initial capital must be positive, got {initial_capital}"
            ));
        }
        let now = Utc::now();
        Ok(Self {
            account_id: account_id.to_string(),
            initial_capital,
            cash: initial_capital,
            frozen_cash: Decimal::ZERO,
            positions: HashMap::new(),
            orders: HashMap::new(),
            fills: Vec::new(),
            trades: Vec::new(),
            open_trades: HashMap::new(),
            total_commission: Decimal::ZERO,
            total_realized_pnl: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn available_cash(&self) -> Decimal {
        self.cash - self.frozen_cash
    }

    /// All three cash constraints hold: `cash >= frozen >= 0`.
    pub fn is_healthy(&self) -> bool {
        self.frozen_cash >= Decimal::ZERO
            && self.cash >= self.frozen_cash
            && self.available_cash() >= Decimal::ZERO
    }

    /// Reserve cash for a pending buy order.
    pub fn freeze_cash(&mut self, amount: Decimal) -> KfResult<()> {
        if amount > self.available_cash() {
            return Err(RiskError::InsufficientCash {
                required: amount,
                available: self.available_cash(),
            }
            .into());
        }
        self.frozen_cash += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release previously frozen cash; clamped so frozen never goes negative.
    pub fn unfreeze_cash(&mut self, amount: Decimal) {
        self.frozen_cash = (self.frozen_cash - amount).max(Decimal::ZERO);
        self.updated_at = Utc::now();
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn record_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
        self.updated_at = Utc::now();
    }

    /// Replace a tracked order with a newer state.
    pub fn update_order(&mut self, order: Order) {
        self.record_order(order);
    }

    /// The single mutation path for positions and cash.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let delta = fill.signed_quantity();

        // Realize P&L on the reducing portion before the position moves.
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::new(fill.symbol.clone(), fill.strategy_id.clone()));

        if position.quantity != 0 && position.quantity.signum() != delta.signum() {
            let closed = delta.abs().min(position.quantity.abs());
            let pnl = if position.quantity > 0 {
                (fill.price - position.average_cost) * Decimal::from(closed)
            } else {
                (position.average_cost - fill.price) * Decimal::from(closed)
            };
            self.total_realized_pnl += pnl;
        }

        position.apply(delta, fill.price);
        if position.is_flat() {
            self.positions.remove(&fill.symbol);
        }

        self.cash += fill.net_amount;
        self.total_commission += fill.commission;
        self.record_trade(fill);
        self.fills.push(fill.clone());
        self.updated_at = fill.executed_at;
    }

    /// Round-trip bookkeeping: open, extend, close, or reverse.
    fn record_trade(&mut self, fill: &Fill) {
        match self.open_trades.get_mut(&fill.symbol) {
            None => {
                self.open_trades
                    .insert(fill.symbol.clone(), Trade::open(fill, fill.quantity));
            }
            Some(trade) if trade.side == fill.side => {
                trade.extend(fill, fill.quantity);
            }
            Some(trade) => {
                let open_remaining = trade.open_quantity - trade.closed_quantity;
                let closing = fill.quantity.min(open_remaining);
                trade.close(fill, closing);
                if trade.status == TradeStatus::Closed {
                    let done = self.open_trades.remove(&fill.symbol);
                    if let Some(done) = done {
                        self.trades.push(done);
                    }
                    let residual = fill.quantity - closing;
                    if residual > 0 {
                        self.open_trades
                            .insert(fill.symbol.clone(), Trade::open(fill, residual));
                    }
                }
            }
        }
    }

    /// Total assets at the supplied prices, falling back to average cost for
    /// symbols without a quote.
    pub fn total_market_value(&self, prices: &HashMap<Symbol, Decimal>) -> Decimal {
        let positions_value: Decimal = self
            .positions
            .values()
            .map(|p| {
                let price = prices.get(&p.symbol).copied().unwrap_or(p.average_cost);
                p.market_value(price)
            })
            .sum();
        self.cash + positions_value
    }
}
