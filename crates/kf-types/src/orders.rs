use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::Symbol;

/// Unique order identifier
pub type OrderId = Uuid;

/// Direction of an order (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells; used for signed position deltas.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

/// Order types supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
    Stop { stop_price: Decimal },
    StopLimit { stop_price: Decimal, limit_price: Decimal },
}

impl OrderType {
    /// The limit price, for order types that carry one.
    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderType::Limit { price } => Some(*price),
            OrderType::StopLimit { limit_price, .. } => Some(*limit_price),
            _ => None,
        }
    }
}

/// Time in force specifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc, // Good till cancelled
    Ioc, // Immediate or cancel
    Fok, // Fill or kill
    Gtt, // Good till time (requires expire_at)
}

/// Order status during lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

/// Action attached to an [`OrderEvent`] on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    New,
    Modify,
    Cancel,
    Reject,
}

/// A commitment to trade at specific terms pending execution.
///
/// Quantities are whole shares; `filled_quantity + remaining_quantity ==
/// quantity` holds through every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub filled_quantity: i64,
    pub remaining_quantity: i64,
    pub average_fill_price: Option<Decimal>,
    pub total_fill_amount: Decimal,
    pub signal_id: Option<Uuid>,
    pub strategy_id: Option<String>,
    pub tag: Option<String>,
    pub time_in_force: TimeInForce,
    pub expire_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl Order {
    pub fn new(symbol: Symbol, side: Side, quantity: i64, order_type: OrderType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol,
            side,
            order_type,
            quantity,
            status: OrderStatus::Pending,
            created_at: now,
            submitted_at: None,
            updated_at: now,
            filled_quantity: 0,
            remaining_quantity: quantity,
            average_fill_price: None,
            total_fill_amount: Decimal::ZERO,
            signal_id: None,
            strategy_id: None,
            tag: None,
            time_in_force: TimeInForce::Day,
            expire_at: None,
            reason: None,
        }
    }

    pub fn market_order(symbol: Symbol, side: Side, quantity: i64) -> Self {
        Self::new(symbol, side, quantity, OrderType::Market)
    }

    pub fn limit_order(symbol: Symbol, side: Side, quantity: i64, price: Decimal) -> Self {
        Self::new(symbol, side, quantity, OrderType::Limit { price })
    }

    pub fn with_signal(mut self, signal_id: Uuid, strategy_id: &str) -> Self {
        self.signal_id = Some(signal_id);
        self.strategy_id = Some(strategy_id.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        self.order_type.limit_price()
    }

    pub fn is_buy(&self) -> bool {
        matches!(self.side, Side::Buy)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }

    /// Orders can be cancelled until they reach a terminal status.
    pub fn is_cancellable(&self) -> bool {
        self.is_active()
    }

    /// Mark the order as handed off to an execution venue.
    pub fn submit(&mut self) {
        let now = Utc::now();
        self.status = OrderStatus::Submitted;
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    /// Apply an execution of `quantity` shares at `price`.  Quantity beyond
    /// the remaining amount is truncated.
    pub fn apply_fill(&mut self, quantity: i64, price: Decimal) {
        let fill_quantity = quantity.min(self.remaining_quantity);
        if fill_quantity <= 0 {
            return;
        }

        self.total_fill_amount += Decimal::from(fill_quantity) * price;
        self.filled_quantity += fill_quantity;
        self.remaining_quantity = self.quantity - self.filled_quantity;
        self.average_fill_price =
            Some(self.total_fill_amount / Decimal::from(self.filled_quantity));

        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self, reason: &str) -> bool {
        if !self.is_cancellable() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        self.reason = Some(reason.to_string());
        self.updated_at = Utc::now();
        true
    }

    pub fn reject(&mut self, reason: &str) {
        self.status = OrderStatus::Rejected;
        self.reason = Some(reason.to_string());
        self.updated_at = Utc::now();
    }

    pub fn expire(&mut self) {
        if self.is_active() {
            self.status = OrderStatus::Expired;
            self.updated_at = Utc::now();
        }
    }
}

/// Order event carried on the bus.  The `action` distinguishes fresh orders
/// from cancellation/rejection feedback flowing back to the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order: Order,
    pub action: OrderAction,
    pub related_signal_id: Option<Uuid>,
}

impl OrderEvent {
    pub fn new(order: Order, action: OrderAction) -> Self {
        let related_signal_id = order.signal_id;
        Self {
            order,
            action,
            related_signal_id,
        }
    }
}
