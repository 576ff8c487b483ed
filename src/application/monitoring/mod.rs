pub mod control;

pub use control::ControlManager;
