use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::Symbol;
use crate::orders::{OrderId, Side};

/// Fee schedule applied to every fill.
///
/// The defaults are CN A-share conventions; all rates and floors are
/// tunable through the execution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Commission as a fraction of gross amount, both sides.
    pub commission_rate: Decimal,
    /// Minimum commission per fill.
    pub min_commission: Decimal,
    /// Stamp tax as a fraction of gross amount, sell side only.
    pub stamp_tax_rate: Decimal,
    /// Transfer fee as a fraction of gross amount, both sides.
    pub transfer_fee_rate: Decimal,
    /// Minimum transfer fee per fill.
    pub min_transfer_fee: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            commission_rate: Decimal::new(3, 4),     // 0.0003
            min_commission: Decimal::from(5),
            stamp_tax_rate: Decimal::new(1, 3),      // 0.001
            transfer_fee_rate: Decimal::new(2, 5),   // 0.00002
            min_transfer_fee: Decimal::ONE,
        }
    }
}

impl FeeSchedule {
    pub fn commission(&self, amount: Decimal) -> Decimal {
        (amount * self.commission_rate).max(self.min_commission)
    }

    pub fn stamp_tax(&self, amount: Decimal, side: Side) -> Decimal {
        match side {
            Side::Sell => amount * self.stamp_tax_rate,
            Side::Buy => Decimal::ZERO,
        }
    }

    pub fn transfer_fee(&self, amount: Decimal) -> Decimal {
        (amount * self.transfer_fee_rate).max(self.min_transfer_fee)
    }
}

/// A realized (possibly partial) execution of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    /// Gross amount, `quantity * price`.
    pub amount: Decimal,
    pub commission: Decimal,
    pub stamp_tax: Decimal,
    pub transfer_fee: Decimal,
    pub total_fee: Decimal,
    /// Signed cash impact: `-(amount + total_fee)` for buys,
    /// `amount - total_fee` for sells.
    pub net_amount: Decimal,
    pub executed_at: DateTime<Utc>,
    pub strategy_id: Option<String>,
    pub simulated: bool,
}

impl Fill {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        quantity: i64,
        price: Decimal,
        fees: &FeeSchedule,
        strategy_id: Option<String>,
        simulated: bool,
    ) -> Self {
        let amount = Decimal::from(quantity) * price;
        let commission = fees.commission(amount);
        let stamp_tax = fees.stamp_tax(amount, side);
        let transfer_fee = fees.transfer_fee(amount);
        let total_fee = commission + stamp_tax + transfer_fee;
        let net_amount = match side {
            Side::Buy => -(amount + total_fee),
            Side::Sell => amount - total_fee,
        };

        Self {
            id: Uuid::new_v4(),
            order_id,
            symbol,
            side,
            quantity,
            price,
            amount,
            commission,
            stamp_tax,
            transfer_fee,
            total_fee,
            net_amount,
            executed_at: Utc::now(),
            strategy_id,
            simulated,
        }
    }

    /// Position delta contributed by this fill (+buys, -sells).
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_symbol() -> Symbol {
        Symbol::shenzhen("000001")
    }

    #[test]
    fn test_buy_fill_fees_and_net() {
        let fill = Fill::new(
            Uuid::new_v4(),
            test_symbol(),
            Side::Buy,
            1000,
            dec!(10.00),
            &FeeSchedule::default(),
            Some("s1".into()),
            true,
        );

        assert_eq!(fill.amount, dec!(10000.00));
        // 10000 * 0.0003 = 3 -> floored to 5
        assert_eq!(fill.commission, dec!(5));
        // No stamp tax on buys
        assert_eq!(fill.stamp_tax, Decimal::ZERO);
        // 10000 * 0.00002 = 0.2 -> floored to 1
        assert_eq!(fill.transfer_fee, dec!(1));
        assert_eq!(fill.total_fee, dec!(6));
        assert_eq!(fill.net_amount, dec!(-10006.00));
        assert_eq!(fill.signed_quantity(), 1000);
    }

    #[test]
    fn test_sell_fill_includes_stamp_tax() {
        let fill = Fill::new(
            Uuid::new_v4(),
            test_symbol(),
            Side::Sell,
            10000,
            dec!(10.00),
            &FeeSchedule::default(),
            None,
            true,
        );

        assert_eq!(fill.amount, dec!(100000.00));
        // 100000 * 0.0003 = 30, above the floor
        assert_eq!(fill.commission, dec!(30.000000));
        assert_eq!(fill.stamp_tax, dec!(100.00000));
        assert_eq!(fill.transfer_fee, dec!(2.0000000));
        assert_eq!(fill.total_fee, fill.commission + fill.stamp_tax + fill.transfer_fee);
        assert_eq!(fill.net_amount, fill.amount - fill.total_fee);
        assert_eq!(fill.signed_quantity(), -10000);
    }

    #[test]
    fn test_custom_fee_schedule() {
        let fees = FeeSchedule {
            commission_rate: Decimal::new(5, 4), // 0.0005
            min_commission: Decimal::ZERO,
            stamp_tax_rate: Decimal::ZERO,
            transfer_fee_rate: Decimal::ZERO,
            min_transfer_fee: Decimal::ZERO,
        };
        let fill = Fill::new(
            Uuid::new_v4(),
            test_symbol(),
            Side::Buy,
            100,
            dec!(20.00),
            &fees,
            None,
            false,
        );
        assert_eq!(fill.commission, dec!(1.000000));
        assert_eq!(fill.total_fee, dec!(1.000000));
        assert!(!fill.simulated);
    }
}
