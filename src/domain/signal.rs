use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a strategy wants done. HOLD is persisted for the audit trail but
/// never produces an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(SignalAction::Buy),
            "SELL" => Ok(SignalAction::Sell),
            "HOLD" => Ok(SignalAction::Hold),
            _ => anyhow::bail!("Invalid signal action: {}", s),
        }
    }
}

/// A trading intent emitted by a strategy, validated by risk before any
/// order is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub action: SignalAction,
    /// Strategy conviction in [0, 1].
    pub confidence: f64,
    pub reason: String,
    /// When absent, the risk validator sizes the order from equity.
    pub suggested_quantity: Option<i64>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [SignalAction::Buy, SignalAction::Sell, SignalAction::Hold] {
            assert_eq!(
                SignalAction::from_str(&action.to_string()).unwrap(),
                action
            );
        }
        assert!(SignalAction::from_str("SHORT").is_err());
    }
}
