use crate::domain::errors::OrderError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => anyhow::bail!("Invalid order side: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            _ => anyhow::bail!("Invalid order type: {}", s),
        }
    }
}

/// Order lifecycle states. FILLED, CANCELED and REJECTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingNew,
    Submitted,
    PartialFill,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// The state machine. PARTIAL_FILL -> PARTIAL_FILL is allowed for
    /// subsequent partial executions.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingNew, Submitted)
                | (PendingNew, Rejected)
                | (Submitted, PartialFill)
                | (Submitted, Filled)
                | (Submitted, Canceled)
                | (Submitted, Rejected)
                | (PartialFill, PartialFill)
                | (PartialFill, Filled)
                | (PartialFill, Canceled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::PendingNew => "PENDING_NEW",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PartialFill => "PARTIAL_FILL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING_NEW" => Ok(OrderStatus::PendingNew),
            "SUBMITTED" => Ok(OrderStatus::Submitted),
            "PARTIAL_FILL" => Ok(OrderStatus::PartialFill),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            _ => anyhow::bail!("Invalid order status: {}", s),
        }
    }
}

/// An order keyed by its deterministic idempotency id. The OMS is the sole
/// writer; everyone else sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub signal_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub price: Option<Decimal>,
    pub broker_order_id: Option<String>,
    pub status: OrderStatus,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        order_id: String,
        signal_id: String,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            signal_id,
            symbol,
            side,
            order_type,
            quantity,
            filled_quantity: 0,
            price,
            broker_order_id: None,
            status: OrderStatus::PendingNew,
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply an execution. Moves to FILLED once the full quantity is done,
    /// otherwise SUBMITTED -> PARTIAL_FILL (and PARTIAL_FILL stays put).
    pub fn apply_fill(&mut self, quantity: i64) -> Result<(), OrderError> {
        if quantity <= 0 {
            return Err(OrderError::NonPositiveFill(quantity));
        }
        if quantity > self.remaining_quantity() {
            return Err(OrderError::FillExceedsRemaining {
                quantity,
                remaining: self.remaining_quantity(),
            });
        }

        self.filled_quantity += quantity;
        self.updated_at = Utc::now();

        if self.filled_quantity >= self.quantity {
            self.transition_to(OrderStatus::Filled)
        } else if self.status == OrderStatus::Submitted {
            self.transition_to(OrderStatus::PartialFill)
        } else {
            Ok(())
        }
    }

    pub fn mark_submitted(&mut self, broker_order_id: String) -> Result<(), OrderError> {
        self.broker_order_id = Some(broker_order_id);
        self.transition_to(OrderStatus::Submitted)
    }

    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.reject_reason = Some(reason.into());
        self.transition_to(OrderStatus::Rejected)
    }

    pub fn mark_canceled(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Canceled)
    }
}

/// A partial or complete execution of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub broker_fill_id: Option<String>,
    pub quantity: i64,
    pub price: Decimal,
    pub commission: Option<Decimal>,
    pub filled_at: DateTime<Utc>,
}
