use thiserror::Error;

/// Main error type for the Kingfisher system
#[derive(Error, Debug)]
pub enum KfError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Risk rejection: {0}")]
    Risk(#[from] RiskError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Event-engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("subscriber initialization failed for {handler}: {message}")]
    SubscriberInitFailed { handler: String, message: String },

    #[error("subscriber not found: {handler} on {kind}")]
    SubscriberNotFound { handler: String, kind: String },

    #[error("shutdown incomplete: {pending} worker(s) did not exit within {timeout_ms} ms")]
    ShutdownTimeout { pending: usize, timeout_ms: u64 },
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("No data available for symbol {symbol} in date range {start} to {end}")]
    NoDataInRange {
        symbol: String,
        start: String,
        end: String,
    },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Missing column in archive: {column}")]
    MissingColumn { column: String },

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Strategy-related errors
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy not found: {strategy_id}")]
    NotFound { strategy_id: String },

    #[error("Strategy already registered: {strategy_id}")]
    AlreadyRegistered { strategy_id: String },

    #[error("Strategy limit reached: {max} strategies")]
    LimitReached { max: usize },

    #[error("Strategy initialization failed: {message}")]
    InitializationFailed { message: String },

    #[error("Invalid strategy configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Strategy execution error: {message}")]
    ExecutionError { message: String },
}

/// Order-related errors
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Invalid order: {message}")]
    Invalid { message: String },

    #[error("Order rejected: {reason}")]
    Rejected { reason: String },

    #[error("Order {order_id} is not cancellable in status {status}")]
    NotCancellable { order_id: String, status: String },
}

/// Pre-trade risk rejections
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("invalid signal: {message}")]
    InvalidSignal { message: String },

    #[error("signal expired at {expired_at}")]
    SignalExpired { expired_at: String },

    #[error("symbol {symbol} is blocked: {reason}")]
    SymbolBlocked { symbol: String, reason: String },

    #[error("position limit: {message}")]
    PositionLimit { message: String },

    #[error("order amount {amount} below minimum {minimum}")]
    BelowMinOrderAmount {
        amount: rust_decimal::Decimal,
        minimum: rust_decimal::Decimal,
    },

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("daily risk limit breached: {message}")]
    DailyLimit { message: String },

    #[error("rounded quantity is zero for amount {amount} at price {price}")]
    ZeroQuantity {
        amount: rust_decimal::Decimal,
        price: rust_decimal::Decimal,
    },
}

/// Execution-related errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("missing market data for {symbol}")]
    MissingMarketData { symbol: String },

    #[error("broker error: {message}")]
    Broker { message: String },

    #[error("not connected to broker")]
    NotConnected,
}

/// Result type alias for Kingfisher operations
pub type KfResult<T> = Result<T, KfError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::errors::KfError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::errors::KfError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_error_display() {
        let error = RiskError::InsufficientCash {
            required: Decimal::from(1000),
            available: Decimal::from(500),
        };

        assert!(error.to_string().contains("insufficient cash"));
        assert!(error.to_string().contains("1000"));
        assert!(error.to_string().contains("500"));
    }

    #[test]
    fn test_error_conversion() {
        let order_error = OrderError::Invalid {
            message: "test".to_string(),
        };
        let kf_error: KfError = order_error.into();

        match kf_error {
            KfError::Order(_) => (),
            _ => panic!("Expected Order error"),
        }
    }

    #[test]
    fn test_macros() {
        let _validation_err = validation_error!("Invalid value: {}", 42);
        let _config_err = config_error!("Missing required field: {}", "symbol");
    }
}
