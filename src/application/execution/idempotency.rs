use crate::domain::signal::Signal;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Orders for the same signal within one bucket share an identity, so a
/// crashed-and-replayed submission cannot double-order.
pub const DEFAULT_BUCKET_SECONDS: i64 = 60;

/// Deterministic order id from (signal_id | symbol | action | quantity |
/// time bucket).
pub fn order_idempotency_key(signal: &Signal, quantity: i64, bucket_seconds: i64) -> String {
    let bucket = signal.timestamp.timestamp().div_euclid(bucket_seconds);
    let key = format!(
        "{}|{}|{}|{}|{}",
        signal.signal_id, signal.symbol, signal.action, quantity, bucket
    );
    let digest = Sha256::digest(key.as_bytes());
    format!("ORD-{}", &hex::encode(digest)[..16])
}

pub fn fill_id(order_id: &str, fill_sequence: usize) -> String {
    format!("FILL-{order_id}-{fill_sequence}")
}

pub fn signal_id(strategy_name: &str, symbol: &str, timestamp: DateTime<Utc>) -> String {
    let key = format!(
        "{}|{}|{}",
        strategy_name,
        symbol,
        timestamp.timestamp_millis()
    );
    let digest = Sha256::digest(key.as_bytes());
    format!("SIG-{}", &hex::encode(digest)[..12])
}

/// Short random token appended when retrying past a terminal order with the
/// same idempotency key.
pub fn retry_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
