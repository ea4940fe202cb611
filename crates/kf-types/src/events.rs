use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::fills::Fill;
use crate::market::{Bar, Symbol};
use crate::orders::{OrderAction, OrderEvent};
use crate::signal::Signal;

/// Default priority for events that carry no stronger convention.
pub const DEFAULT_PRIORITY: u8 = 5;
/// Fills preempt everything else on the bus.
pub const PRIORITY_FILL: u8 = 1;
/// Orders are next in urgency.
pub const PRIORITY_ORDER: u8 = 2;
/// Signals sit between orders and market data.
pub const PRIORITY_SIGNAL: u8 = 3;

/// Event type tag used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Market,
    Signal,
    Order,
    Fill,
    Timer,
    System,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Market => "MARKET",
            EventKind::Signal => "SIGNAL",
            EventKind::Order => "ORDER",
            EventKind::Fill => "FILL",
            EventKind::Timer => "TIMER",
            EventKind::System => "SYSTEM",
        };
        write!(f, "{}", s)
    }
}

/// Kinds of periodic timer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    MarketDataUpdate,
    RiskCheck,
    Heartbeat,
    Cleanup,
    StrategyTimer,
    PortfolioRebalance,
}

impl TimerKind {
    /// Bus priority derived from the timer kind.
    pub fn priority(&self) -> u8 {
        match self {
            TimerKind::MarketDataUpdate => 3,
            TimerKind::RiskCheck => 4,
            TimerKind::StrategyTimer => 5,
            TimerKind::PortfolioRebalance => 6,
            TimerKind::Heartbeat => 8,
            TimerKind::Cleanup => 9,
        }
    }
}

/// Payload of a periodic timer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEvent {
    pub kind: TimerKind,
    pub interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Payload of a signal event, carrying the id of the market event that
/// triggered it (when any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal: Signal,
    pub source_event_id: Option<Uuid>,
}

/// Free-form system notification (lifecycle announcements, diagnostics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub message: String,
}

/// Typed payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Market(Bar),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(Fill),
    Timer(TimerEvent),
    System(SystemEvent),
}

/// Envelope published on the event bus.  Immutable after publication: the
/// bus takes ownership and subscribers receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Lower is more urgent; clamped to `[1, 10]`.
    pub priority: u8,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl Event {
    fn with_payload(priority: u8, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            priority: priority.clamp(1, 10),
            payload,
            extensions: HashMap::new(),
        }
    }

    pub fn market(bar: Bar) -> Self {
        Self::with_payload(DEFAULT_PRIORITY, EventPayload::Market(bar))
    }

    pub fn signal(signal: Signal, source_event_id: Option<Uuid>) -> Self {
        Self::with_payload(
            PRIORITY_SIGNAL,
            EventPayload::Signal(SignalEvent {
                signal,
                source_event_id,
            }),
        )
    }

    pub fn order(event: OrderEvent) -> Self {
        Self::with_payload(PRIORITY_ORDER, EventPayload::Order(event))
    }

    pub fn order_action(order: crate::orders::Order, action: OrderAction) -> Self {
        Self::order(OrderEvent::new(order, action))
    }

    pub fn fill(fill: Fill) -> Self {
        Self::with_payload(PRIORITY_FILL, EventPayload::Fill(fill))
    }

    pub fn timer(kind: TimerKind, interval_ms: u64) -> Self {
        Self::with_payload(
            kind.priority(),
            EventPayload::Timer(TimerEvent {
                kind,
                interval_ms,
                payload: None,
            }),
        )
    }

    pub fn system(message: &str) -> Self {
        Self::with_payload(
            DEFAULT_PRIORITY,
            EventPayload::System(SystemEvent {
                message: message.to_string(),
            }),
        )
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_extension(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    /// Routing tag derived from the payload.
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Market(_) => EventKind::Market,
            EventPayload::Signal(_) => EventKind::Signal,
            EventPayload::Order(_) => EventKind::Order,
            EventPayload::Fill(_) => EventKind::Fill,
            EventPayload::Timer(_) => EventKind::Timer,
            EventPayload::System(_) => EventKind::System,
        }
    }

    /// The symbol this event concerns, when it concerns one.
    pub fn symbol(&self) -> Option<&Symbol> {
        match &self.payload {
            EventPayload::Market(bar) => Some(&bar.symbol),
            EventPayload::Signal(ev) => Some(&ev.signal.symbol),
            EventPayload::Order(ev) => Some(&ev.order.symbol),
            EventPayload::Fill(fill) => Some(&fill.symbol),
            EventPayload::Timer(_) | EventPayload::System(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Frequency, Symbol};
    use crate::orders::{Order, Side};
    use crate::signal::Direction;
    use rust_decimal_macros::dec;

    fn sample_bar() -> Bar {
        Bar::new(
            Symbol::shenzhen("000001"),
            Utc::now(),
            Frequency::Day1,
            dec!(10.00),
            dec!(10.10),
            dec!(9.95),
            dec!(10.05),
            1_000_000,
            dec!(10_050_000),
        )
    }

    #[test]
    fn test_default_priorities() {
        let market = Event::market(sample_bar());
        assert_eq!(market.priority, DEFAULT_PRIORITY);
        assert_eq!(market.kind(), EventKind::Market);

        let order = Order::limit_order(Symbol::shenzhen("000001"), Side::Buy, 100, dec!(10.00));
        let order_event = Event::order_action(order, OrderAction::New);
        assert_eq!(order_event.priority, PRIORITY_ORDER);

        let fill = crate::fills::Fill::new(
            Uuid::new_v4(),
            Symbol::shenzhen("000001"),
            Side::Buy,
            100,
            dec!(10.00),
            &crate::fills::FeeSchedule::default(),
            None,
            true,
        );
        assert_eq!(Event::fill(fill).priority, PRIORITY_FILL);
    }

    #[test]
    fn test_priority_clamped() {
        let event = Event::market(sample_bar()).with_priority(0);
        assert_eq!(event.priority, 1);
        let event = Event::market(sample_bar()).with_priority(200);
        assert_eq!(event.priority, 10);
    }

    #[test]
    fn test_timer_priorities_follow_kind() {
        assert_eq!(Event::timer(TimerKind::MarketDataUpdate, 1000).priority, 3);
        assert_eq!(Event::timer(TimerKind::RiskCheck, 1000).priority, 4);
        assert_eq!(Event::timer(TimerKind::StrategyTimer, 1000).priority, 5);
        assert_eq!(Event::timer(TimerKind::PortfolioRebalance, 1000).priority, 6);
        assert_eq!(Event::timer(TimerKind::Heartbeat, 1000).priority, 8);
        assert_eq!(Event::timer(TimerKind::Cleanup, 1000).priority, 9);
    }

    #[test]
    fn test_symbol_accessor() {
        let event = Event::market(sample_bar());
        assert_eq!(event.symbol().unwrap().to_string(), "000001.SZ");

        let timer = Event::timer(TimerKind::Heartbeat, 5000);
        assert!(timer.symbol().is_none());
    }

    #[test]
    fn test_signal_event_carries_source() {
        let source = Uuid::new_v4();
        let signal = Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Buy,
            dec!(0.8),
            dec!(10.00),
            "test",
        );
        let event = Event::signal(signal, Some(source));
        match &event.payload {
            EventPayload::Signal(ev) => assert_eq!(ev.source_event_id, Some(source)),
            _ => panic!("expected signal payload"),
        }
    }

    #[test]
    fn test_extensions() {
        let event =
            Event::system("engine started").with_extension("node", serde_json::json!("local"));
        assert_eq!(event.kind(), EventKind::System);
        assert_eq!(event.extensions.len(), 1);
    }
}
