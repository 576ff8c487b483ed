pub mod event_bus;
pub mod logging;
pub mod mock;
pub mod persistence;
