pub mod portfolio_tracker;
pub mod validator;

pub use portfolio_tracker::PortfolioTracker;
pub use validator::{RiskValidator, ValidationResult};
