pub mod candle_aggregator;
pub mod service;

pub use candle_aggregator::CandleAggregator;
pub use service::MarketDataService;
