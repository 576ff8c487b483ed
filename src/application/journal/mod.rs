pub mod service;
pub mod writer;

pub use service::JournalService;
