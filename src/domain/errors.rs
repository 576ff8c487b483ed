use rust_decimal::Decimal;
use thiserror::Error;

/// Normalized broker-side failures. Concrete adapters map their wire-level
/// error codes into this taxonomy before the core ever sees them.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("order rejected ({code}): {message}")]
    OrderRejected { code: String, message: String },

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded { retry_after_ms: u64 },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("market is closed")]
    MarketClosed,

    #[error("broker error: {0}")]
    Other(String),
}

/// Violations of the order state machine and fill accounting rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("fill quantity must be positive, got {0}")]
    NonPositiveFill(i64),

    #[error("fill quantity {quantity} exceeds remaining {remaining}")]
    FillExceedsRemaining { quantity: i64, remaining: i64 },
}

/// Tick-level validation failures, rejected at construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickError {
    #[error("tick price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("tick volume cannot be negative, got {0}")]
    NegativeVolume(i64),
}

/// Strategy registry failures.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy '{name}' not found. Available strategies: {available:?}")]
    UnknownStrategy { name: String, available: Vec<String> },

    #[error("strategy '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strategy_lists_available() {
        let err = StrategyError::UnknownStrategy {
            name: "momentum_v9".to_string(),
            available: vec!["pullback_v1".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("momentum_v9"));
        assert!(msg.contains("pullback_v1"));
    }

    #[test]
    fn test_order_error_formatting() {
        let err = OrderError::FillExceedsRemaining {
            quantity: 12,
            remaining: 7,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("7"));
    }
}
