//! Live execution: orders are handed to an external broker adapter whose
//! asynchronous reports are translated back into the same bus events the
//! simulated venue produces.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use kf_engine::EventBus;
use kf_types::{
    Event, FeeSchedule, Fill, KfResult, Order, OrderAction, OrderEvent, OrderId,
};

use crate::handler::{validate_order, ExecutionHandler, OrderTracker};

/// Execution outcome pushed by the broker connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionReport {
    Fill {
        order_id: OrderId,
        quantity: i64,
        price: Decimal,
    },
    Rejected {
        order_id: OrderId,
        reason: String,
    },
    Cancelled {
        order_id: OrderId,
    },
}

/// Contract for a real brokerage connection.
///
/// Implementations own their transport (REST, FIX, vendor SDK) and deliver
/// [`ExecutionReport`]s through the sink passed at connect time.  Every call
/// must respect the configured timeout internally where the transport does
/// not provide one.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn connect(&self, reports: Arc<dyn ReportSink>) -> KfResult<()>;

    async fn disconnect(&self) -> KfResult<()>;

    /// Hand an order to the broker.  Completion here means acceptance, not
    /// execution; fills arrive as reports.
    async fn submit_order(&self, order: &Order) -> KfResult<()>;

    /// Request cancellation.  `Ok(false)` means the broker refused (e.g.
    /// already executed); the order's status is then left unchanged.
    async fn cancel_order(&self, order_id: OrderId) -> KfResult<bool>;
}

/// Receiver for broker execution reports.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, report: ExecutionReport);
}

/// Execution handler for live trading: same bookkeeping and bus feedback as
/// the simulated venue, with the fill source replaced by broker callbacks.
///
/// `connect`, `disconnect`, and `cancel_order` block on the supplied runtime
/// handle and must be called from outside that runtime's worker threads (the
/// bus subscriber workers qualify).
pub struct LiveExecutionHandler {
    bus: Arc<EventBus>,
    tracker: OrderTracker,
    fees: FeeSchedule,
    adapter: Arc<dyn BrokerAdapter>,
    runtime: Handle,
    timeout: Duration,
    max_retries: u32,
    weak_self: Weak<Self>,
}

impl LiveExecutionHandler {
    pub fn new(
        bus: Arc<EventBus>,
        adapter: Arc<dyn BrokerAdapter>,
        fees: FeeSchedule,
        runtime: Handle,
        timeout: Duration,
        max_retries: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            bus,
            tracker: OrderTracker::new(),
            fees,
            adapter,
            runtime,
            timeout,
            max_retries,
            weak_self: weak.clone(),
        })
    }

    /// Connect the broker and wire its report stream to this handler.
    pub fn connect(self: &Arc<Self>) -> KfResult<()> {
        let sink: Arc<dyn ReportSink> = Arc::clone(self) as Arc<dyn ReportSink>;
        let adapter = Arc::clone(&self.adapter);
        self.runtime
            .block_on(async move { adapter.connect(sink).await })
    }

    pub fn disconnect(&self) -> KfResult<()> {
        let adapter = Arc::clone(&self.adapter);
        self.runtime.block_on(async move { adapter.disconnect().await })
    }

    fn publish_order_feedback(&self, order: Order, action: OrderAction) {
        self.bus.publish(Event::order(OrderEvent::new(order, action)));
    }

    /// Translate one broker report into tracker updates and bus events.
    fn apply_report(&self, report: ExecutionReport) {
        match report {
            ExecutionReport::Fill {
                order_id,
                quantity,
                price,
            } => {
                let Some(updated) = self.tracker.apply_fill(&order_id, quantity, price) else {
                    warn!(order = %order_id, "fill report for unknown order");
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
                    false,
                );
                info!(
                    order = %updated.id,
                    quantity,
                    price = %price,
                    remaining = updated.remaining_quantity,
                    "broker fill"
                );
                self.bus.publish(Event::fill(fill));
            }
            ExecutionReport::Rejected { order_id, reason } => {
                if let Some(order) = self.tracker.reject(&order_id, &reason) {
                    warn!(order = %order_id, reason = %reason, "broker rejected order");
                    self.publish_order_feedback(order, OrderAction::Reject);
                }
            }
            ExecutionReport::Cancelled { order_id } => {
                if let Some(order) = self.tracker.cancel(&order_id, "cancelled by broker") {
                    info!(order = %order_id, "broker confirmed cancel");
                    self.publish_order_feedback(order, OrderAction::Cancel);
                }
            }
        }
    }
}

impl ReportSink for LiveExecutionHandler {
    fn deliver(&self, report: ExecutionReport) {
        self.apply_report(report);
    }
}

impl ExecutionHandler for LiveExecutionHandler {
    fn name(&self) -> &str {
        "live"
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
        let order_id = order.id;
        let adapter = Arc::clone(&self.adapter);
        let weak = self.weak_self.clone();
        let timeout = self.timeout;
        let attempts = self.max_retries.max(1);

        self.runtime.spawn(async move {
            let mut failure = None;
            for attempt in 1..=attempts {
                let result = tokio::time::timeout(timeout, adapter.submit_order(&order)).await;
                failure = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("broker submit timed out after {timeout:?}")),
                };
                match &failure {
                    None => break,
                    Some(reason) => warn!(
                        order = %order_id,
                        attempt,
                        attempts,
                        reason = %reason,
                        "broker submission attempt failed"
                    ),
                }
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
            if let (Some(reason), Some(handler)) = (failure, weak.upgrade()) {
                error!(order = %order_id, reason = %reason, "broker submission failed");
                handler.apply_report(ExecutionReport::Rejected { order_id, reason });
            }
        });
        Ok(())
    }

    fn cancel_order(&self, order_id: OrderId) -> KfResult<bool> {
        let cancellable = self
            .tracker
            .get(&order_id)
            .map(|o| o.is_cancellable())
            .unwrap_or(false);
        if !cancellable {
            return Ok(false);
        }

        let adapter = Arc::clone(&self.adapter);
        let timeout = self.timeout;
        let accepted = self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, adapter.cancel_order(order_id)).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!(order = %order_id, error = %e, "broker cancel failed");
                    false
                }
                Err(_) => {
                    warn!(order = %order_id, "broker cancel timed out");
                    false
                }
            }
        });

        if accepted {
            if let Some(order) = self.tracker.cancel(&order_id, "cancelled by request") {
                self.publish_order_feedback(order, OrderAction::Cancel);
            }
            Ok(true)
        } else {
            // A failed cancel leaves the order status unchanged.
            Ok(false)
        }
    }

    fn active_orders(&self) -> Vec<Order> {
        self.tracker.active()
    }
}
