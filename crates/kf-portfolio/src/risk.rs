use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kf_types::Symbol;

/// Reason string recorded when the periodic sweep blocks a symbol.
pub const RISK_LIMIT_TRIGGERED: &str = "risk-limit-triggered";

/// Per-symbol risk state maintained from fills and periodic sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub symbol: Symbol,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    /// Incremental P&L realized on this symbol today (fees included).
    pub daily_pnl: Decimal,
    /// High-water mark of `daily_pnl`.
    pub peak_pnl: Decimal,
    /// Worst observed drawdown from the peak, as a fraction of total assets.
    pub max_drawdown: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl RiskStatus {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            is_blocked: false,
            block_reason: None,
            daily_pnl: Decimal::ZERO,
            peak_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            last_trade_time: None,
        }
    }

    /// Fold a fill's P&L contribution in and refresh the drawdown track.
    pub fn record_pnl(&mut self, delta: Decimal, total_assets: Decimal, at: DateTime<Utc>) {
        self.daily_pnl += delta;
        self.peak_pnl = self.peak_pnl.max(self.daily_pnl);
        if total_assets > Decimal::ZERO {
            let drawdown = (self.peak_pnl - self.daily_pnl) / total_assets;
            self.max_drawdown = self.max_drawdown.max(drawdown);
        }
        self.last_trade_time = Some(at);
    }

    pub fn block(&mut self, reason: &str) {
        self.is_blocked = true;
        self.block_reason = Some(reason.to_string());
    }

    /// Start-of-day reset: P&L and drawdown restart, blocks are lifted.
    pub fn reset_daily(&mut self) {
        self.daily_pnl = Decimal::ZERO;
        self.peak_pnl = Decimal::ZERO;
        self.max_drawdown = Decimal::ZERO;
        self.is_blocked = false;
        self.block_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_pnl_tracks_peak_and_drawdown() {
        let mut status = RiskStatus::new(Symbol::shenzhen("000001"));
        let total = dec!(1_000_000);

        status.record_pnl(dec!(5_000), total, Utc::now());
        assert_eq!(status.daily_pnl, dec!(5_000));
        assert_eq!(status.peak_pnl, dec!(5_000));
        assert_eq!(status.max_drawdown, Decimal::ZERO);

        status.record_pnl(dec!(-15_000), total, Utc::now());
        assert_eq!(status.daily_pnl, dec!(-10_000));
        // Drawdown from +5k peak to -10k over 1M assets = 1.5%
        assert_eq!(status.max_drawdown, dec!(0.015));
        assert!(status.last_trade_time.is_some());
    }

    #[test]
    fn test_block_and_reset() {
        let mut status = RiskStatus::new(Symbol::shenzhen("000001"));
        status.block(RISK_LIMIT_TRIGGERED);
        assert!(status.is_blocked);
        assert_eq!(status.block_reason.as_deref(), Some(RISK_LIMIT_TRIGGERED));

        status.reset_daily();
        assert!(!status.is_blocked);
        assert_eq!(status.daily_pnl, Decimal::ZERO);
        assert_eq!(status.max_drawdown, Decimal::ZERO);
    }
}
