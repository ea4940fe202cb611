use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::Symbol;

/// Default validity window for a signal, in seconds.
pub const DEFAULT_SIGNAL_VALIDITY_SECS: u64 = 300;

/// Trade direction recommended by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

/// A strategy's directional, strength-weighted recommendation for a symbol.
///
/// Strength is clamped to `[0, 1]` and priority to `[1, 10]` at construction,
/// so a stored signal is always in range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub strategy_id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub strength: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reference_price: Decimal,
    pub suggested_position_size: Option<Decimal>,
    pub reason: String,
    pub priority: u8,
    pub validity_secs: u64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl Signal {
    pub fn new(
        strategy_id: &str,
        symbol: Symbol,
        direction: Direction,
        strength: Decimal,
        reference_price: Decimal,
        reason: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id: strategy_id.to_string(),
            symbol,
            direction,
            strength: strength.clamp(Decimal::ZERO, Decimal::ONE),
            timestamp: Utc::now(),
            reference_price,
            suggested_position_size: None,
            reason: reason.to_string(),
            priority: 5,
            validity_secs: DEFAULT_SIGNAL_VALIDITY_SECS,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_suggested_size(mut self, size: Decimal) -> Self {
        self.suggested_position_size = Some(size);
        self
    }

    pub fn with_validity_secs(mut self, secs: u64) -> Self {
        self.validity_secs = secs;
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    /// Instant past which this signal must no longer be acted upon.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.timestamp + Duration::seconds(self.validity_secs as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// All required fields populated and within range.
    pub fn is_valid(&self) -> bool {
        !self.strategy_id.is_empty()
            && self.reference_price > Decimal::ZERO
            && self.strength >= Decimal::ZERO
            && self.strength <= Decimal::ONE
            && (1..=10).contains(&self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_signal() -> Signal {
        Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Buy,
            dec!(0.8),
            dec!(10.00),
            "ma cross",
        )
    }

    #[test]
    fn test_signal_is_valid() {
        assert!(sample_signal().is_valid());
    }

    #[test]
    fn test_strength_clamped_on_construction() {
        let s = Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Buy,
            dec!(1.5),
            dec!(10.00),
            "",
        );
        assert_eq!(s.strength, Decimal::ONE);

        let s = Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Sell,
            dec!(-0.2),
            dec!(10.00),
            "",
        );
        assert_eq!(s.strength, Decimal::ZERO);

        // Boundary values survive unchanged
        let s = Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Buy,
            dec!(0.0),
            dec!(10.00),
            "",
        );
        assert!(s.is_valid());
        let s = Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Buy,
            dec!(1.0),
            dec!(10.00),
            "",
        );
        assert!(s.is_valid());
    }

    #[test]
    fn test_priority_clamped() {
        let s = sample_signal().with_priority(0);
        assert_eq!(s.priority, 1);
        let s = sample_signal().with_priority(99);
        assert_eq!(s.priority, 10);
    }

    #[test]
    fn test_invalid_when_reference_price_not_positive() {
        let mut s = sample_signal();
        s.reference_price = Decimal::ZERO;
        assert!(!s.is_valid());
    }

    #[test]
    fn test_invalid_when_strategy_id_empty() {
        let mut s = sample_signal();
        s.strategy_id.clear();
        assert!(!s.is_valid());
    }

    #[test]
    fn test_expiry_window() {
        let mut s = sample_signal().with_validity_secs(60);
        s.timestamp = Utc::now() - Duration::seconds(120);
        assert!(s.is_expired(Utc::now()));

        let s = sample_signal().with_validity_secs(60);
        assert!(!s.is_expired(Utc::now()));
    }
}
