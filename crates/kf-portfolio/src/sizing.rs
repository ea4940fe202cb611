use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use kf_types::Signal;

/// Equities trade in whole lots of 100 shares.
pub const LOT_SIZE: i64 = 100;

/// Gross order amount for a signal: the strategy's suggestion when present,
/// otherwise the configured fixed amount.
pub fn order_amount(signal: &Signal, default_position_size: Decimal) -> Decimal {
    signal
        .suggested_position_size
        .filter(|size| *size > Decimal::ZERO)
        .unwrap_or(default_position_size)
}

/// Whole-lot share quantity purchasable for `amount` at `price`:
/// `floor(amount / price / 100) * 100`.
pub fn lot_quantity(amount: Decimal, price: Decimal) -> i64 {
    if price <= Decimal::ZERO {
        return 0;
    }
    let lots = (amount / price / Decimal::from(LOT_SIZE))
        .floor()
        .to_i64()
        .unwrap_or(0);
    lots.max(0) * LOT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_types::{Direction, Symbol};
    use rust_decimal_macros::dec;

    fn signal() -> Signal {
        Signal::new(
            "s1",
            Symbol::shenzhen("000001"),
            Direction::Buy,
            dec!(0.8),
            dec!(10.00),
            "test",
        )
    }

    #[test]
    fn test_amount_prefers_suggestion() {
        let with_suggestion = signal().with_suggested_size(dec!(25_000));
        assert_eq!(order_amount(&with_suggestion, dec!(10_000)), dec!(25_000));
        assert_eq!(order_amount(&signal(), dec!(10_000)), dec!(10_000));
    }

    #[test]
    fn test_non_positive_suggestion_falls_back() {
        let zero = signal().with_suggested_size(Decimal::ZERO);
        assert_eq!(order_amount(&zero, dec!(10_000)), dec!(10_000));
    }

    #[test]
    fn test_lot_rounding() {
        // 10,000 / 10.00 / 100 = 10 lots
        assert_eq!(lot_quantity(dec!(10_000), dec!(10.00)), 1000);
        // 10,000 / 10.50 = 952.38 shares -> 9 lots
        assert_eq!(lot_quantity(dec!(10_000), dec!(10.50)), 900);
        // Not enough for a single lot
        assert_eq!(lot_quantity(dec!(500), dec!(10.00)), 0);
    }

    #[test]
    fn test_degenerate_price() {
        assert_eq!(lot_quantity(dec!(10_000), Decimal::ZERO), 0);
        assert_eq!(lot_quantity(dec!(10_000), dec!(-1)), 0);
    }
}
