use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

use kf_engine::{EventBus, EventHandler};
use kf_types::{
    Event, EventKind, EventPayload, KfResult, Order, OrderAction, OrderError, OrderId,
};

/// Unified contract for order execution venues.
///
/// Both the simulated and the live implementation share [`OrderTracker`] for
/// bookkeeping and are driven by [`ExecutionEventHandler`] on the bus.
pub trait ExecutionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Take ownership of a validated order and drive it toward fills or a
    /// terminal status.  Implementations report outcomes by publishing
    /// `FillEvent`s and `OrderEvent`s; this call itself fails only on
    /// submission-path errors.
    fn execute_order(&self, order: Order) -> KfResult<()>;

    /// Attempt to cancel an active order.  Returns `true` when the order is
    /// cancelled; `false` leaves its status unchanged.
    fn cancel_order(&self, order_id: OrderId) -> KfResult<bool>;

    /// Orders currently being worked.
    fn active_orders(&self) -> Vec<Order>;
}

/// Reject orders that cannot possibly execute before they are tracked.
pub fn validate_order(order: &Order) -> KfResult<()> {
    if order.quantity <= 0 {
        return Err(OrderError::Invalid {
            message: format!("quantity must be positive, got {}", order.quantity),
        }
        .into());
    }
    if let Some(price) = order.limit_price() {
        if price < Decimal::ZERO {
            return Err(OrderError::Invalid {
                message: format!("limit price must be non-negative, got {price}"),
            }
            .into());
        }
    }
    Ok(())
}

/// Concurrent bookkeeping of in-flight orders shared by execution
/// implementations.
///
/// Terminal transitions remove the order from the active map and return the
/// final state for event publication.
#[derive(Debug, Default)]
pub struct OrderTracker {
    active: DashMap<OrderId, Order>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the order as SUBMITTED and start tracking it.
    pub fn submit(&self, mut order: Order) -> Order {
        order.submit();
        self.active.insert(order.id, order.clone());
        order
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.active.get(order_id).map(|o| o.value().clone())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active(&self) -> Vec<Order> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn active_for_symbol(&self, symbol: &kf_types::Symbol) -> Vec<Order> {
        self.active
            .iter()
            .filter(|entry| &entry.symbol == symbol)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Apply an execution; fully-filled orders leave the active map.
    /// Returns the updated order.
    pub fn apply_fill(&self, order_id: &OrderId, quantity: i64, price: Decimal) -> Option<Order> {
        let mut entry = self.active.get_mut(order_id)?;
        entry.apply_fill(quantity, price);
        let updated = entry.value().clone();
        drop(entry);

        if updated.remaining_quantity == 0 {
            self.active.remove(order_id);
        }
        Some(updated)
    }

    /// Reject and stop tracking.  Returns the rejected order.
    pub fn reject(&self, order_id: &OrderId, reason: &str) -> Option<Order> {
        let (_, mut order) = self.active.remove(order_id)?;
        order.reject(reason);
        Some(order)
    }

    /// Cancel if the order is still cancellable.  Returns the cancelled
    /// order, or `None` when it was unknown or already terminal.
    pub fn cancel(&self, order_id: &OrderId, reason: &str) -> Option<Order> {
        let cancellable = self
            .active
            .get(order_id)
            .map(|o| o.is_cancellable())
            .unwrap_or(false);
        if !cancellable {
            return None;
        }
        let (_, mut order) = self.active.remove(order_id)?;
        order.cancel(reason);
        Some(order)
    }
}

/// Bus adapter: routes `ORDER` events into an [`ExecutionHandler`].  Market
/// data reaches venues through the upstream feeder, not the bus.
pub struct ExecutionEventHandler {
    name: String,
    inner: Arc<dyn ExecutionHandler>,
}

impl ExecutionEventHandler {
    pub fn new(inner: Arc<dyn ExecutionHandler>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("execution-{}", inner.name()),
            inner,
        })
    }

    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> KfResult<()> {
        bus.register(EventKind::Order, Arc::clone(self) as Arc<dyn EventHandler>)?;
        Ok(())
    }
}

impl EventHandler for ExecutionEventHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_event(&self, event: &Event) -> KfResult<()> {
        match &event.payload {
            EventPayload::Order(order_event) => match order_event.action {
                OrderAction::New => self.inner.execute_order(order_event.order.clone()),
                OrderAction::Cancel => {
                    // Cancel requests reference the order id; the outcome is
                    // announced by the venue itself.
                    self.inner.cancel_order(order_event.order.id).map(|_| ())
                }
                OrderAction::Modify => {
                    warn!(order = %order_event.order.id, "order modification is not supported");
                    Ok(())
                }
                // Reject events are feedback we emitted; nothing to do.
                OrderAction::Reject => Ok(()),
            },
            _ => Ok(()),
        }
    }
}
