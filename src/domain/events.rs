use crate::domain::market::{Candle, Tick};
use crate::domain::order::Order;
use crate::domain::signal::Signal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Dispatch tag for handler registration. One entry per event payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Market,
    Signal,
    Order,
    Fill,
    Control,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Market => "market",
            EventKind::Signal => "signal",
            EventKind::Order => "order",
            EventKind::Fill => "fill",
            EventKind::Control => "control",
            EventKind::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Tick or closed candle for one symbol.
#[derive(Debug, Clone)]
pub enum MarketData {
    Tick(Tick),
    Candle(Candle),
}

#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub symbol: String,
    pub data: MarketData,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub signal: Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEventType {
    New,
    Partial,
    Filled,
    Canceled,
    Rejected,
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderEventType::New => "new",
            OrderEventType::Partial => "partial",
            OrderEventType::Filled => "filled",
            OrderEventType::Canceled => "canceled",
            OrderEventType::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub order_id: String,
    pub event_type: OrderEventType,
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct FillEvent {
    pub fill_id: String,
    pub order_id: String,
    pub quantity: i64,
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Shutdown,
    Kill,
}

#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub command: ControlCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub error_type: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub context: serde_json::Value,
}

/// Every event that can cross the bus.
#[derive(Debug, Clone)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    Control(ControlEvent),
    Error(ErrorEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Market(_) => EventKind::Market,
            Event::Signal(_) => EventKind::Signal,
            Event::Order(_) => EventKind::Order,
            Event::Fill(_) => EventKind::Fill,
            Event::Control(_) => EventKind::Control,
            Event::Error(_) => EventKind::Error,
        }
    }
}

/// A bus subscriber. Handlers for one event run concurrently with each
/// other; a failure is logged and does not stop the dispatcher.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;

    /// Used in dispatch failure logs.
    fn name(&self) -> &str {
        "handler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_mapping() {
        let event = Event::Control(ControlEvent {
            command: ControlCommand::Pause,
        });
        assert_eq!(event.kind(), EventKind::Control);

        let event = Event::Error(ErrorEvent {
            error_type: "tick_validation".to_string(),
            message: "bad tick".to_string(),
            severity: ErrorSeverity::Warning,
            context: serde_json::json!({}),
        });
        assert_eq!(event.kind(), EventKind::Error);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
    }
}
