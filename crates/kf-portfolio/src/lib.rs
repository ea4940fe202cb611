pub mod manager;
pub mod risk;
pub mod sizing;

pub use manager::{PortfolioRiskManager, PortfolioStats};
pub use risk::{RiskStatus, RISK_LIMIT_TRIGGERED};
pub use sizing::{lot_quantity, order_amount, LOT_SIZE};
