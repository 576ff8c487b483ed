pub mod reconciler;

pub use reconciler::{ReconciliationResult, Reconciler};
