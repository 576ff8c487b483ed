pub mod idempotency;
pub mod oms;

pub use oms::OrderManagementSystem;
