use crate::application::market_data::candle_aggregator::CandleAggregator;
use crate::domain::errors::BrokerError;
use crate::domain::events::{Event, MarketData, MarketEvent};
use crate::domain::market::{Candle, Tick, Timeframe};
use crate::domain::ports::{Broker, TickCallback};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::Repository;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

struct ServiceInner {
    repo: Repository,
    bus: EventBus,
    aggregator: Mutex<CandleAggregator>,
}

impl ServiceInner {
    /// Tick entry point: publish the raw tick, fold it into the candles,
    /// then persist and publish whatever closed.
    async fn on_tick(&self, tick: Tick) {
        self.bus.publish(Event::Market(MarketEvent {
            symbol: tick.symbol.clone(),
            timestamp: tick.timestamp,
            data: MarketData::Tick(tick.clone()),
        }));

        let closed = self.aggregator.lock().await.process_tick(&tick);
        for candle in closed {
            self.emit_closed_candle(candle).await;
        }
    }

    async fn emit_closed_candle(&self, candle: Candle) {
        if let Err(e) = self.repo.save_candle(&candle).await {
            error!("Failed to persist candle for {}: {:#}", candle.symbol, e);
        }
        self.bus.publish(Event::Market(MarketEvent {
            symbol: candle.symbol.clone(),
            timestamp: candle.open_time,
            data: MarketData::Candle(candle),
        }));
    }
}

/// Owns the subscription set and the tick→candle pipeline. Subscribing
/// passes only the delta of genuinely new symbols to the broker, and
/// unsubscribing clears aggregator state for the removed ones.
pub struct MarketDataService {
    broker: Arc<dyn Broker>,
    inner: Arc<ServiceInner>,
    subscribed: Mutex<HashSet<String>>,
}

impl MarketDataService {
    pub fn new(
        broker: Arc<dyn Broker>,
        repo: Repository,
        bus: EventBus,
        timeframes: Vec<Timeframe>,
    ) -> Self {
        Self {
            broker,
            inner: Arc::new(ServiceInner {
                repo,
                bus,
                aggregator: Mutex::new(CandleAggregator::new(timeframes)),
            }),
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    fn tick_callback(&self) -> TickCallback {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |tick| {
            let inner = Arc::clone(&inner);
            Box::pin(async move { inner.on_tick(tick).await })
        })
    }

    pub async fn subscribe(&self, symbols: &[String]) -> Result<(), BrokerError> {
        let new_symbols: Vec<String> = {
            let subscribed = self.subscribed.lock().await;
            symbols
                .iter()
                .filter(|s| !subscribed.contains(*s))
                .cloned()
                .collect()
        };
        if new_symbols.is_empty() {
            return Ok(());
        }

        self.broker
            .subscribe_market_data(&new_symbols, self.tick_callback())
            .await?;
        self.subscribed.lock().await.extend(new_symbols.iter().cloned());
        info!("Subscribed to market data: {:?}", new_symbols);
        Ok(())
    }

    pub async fn unsubscribe(&self, symbols: &[String]) -> Result<(), BrokerError> {
        let existing: Vec<String> = {
            let subscribed = self.subscribed.lock().await;
            symbols
                .iter()
                .filter(|s| subscribed.contains(*s))
                .cloned()
                .collect()
        };
        if existing.is_empty() {
            return Ok(());
        }

        self.broker.unsubscribe_market_data(&existing).await?;
        {
            let mut subscribed = self.subscribed.lock().await;
            for symbol in &existing {
                subscribed.remove(symbol);
            }
        }
        {
            let mut aggregator = self.inner.aggregator.lock().await;
            for symbol in &existing {
                aggregator.clear_symbol(symbol);
            }
        }
        info!("Unsubscribed from market data: {:?}", existing);
        Ok(())
    }

    pub async fn unsubscribe_all(&self) -> Result<(), BrokerError> {
        let symbols: Vec<String> = self.subscribed.lock().await.iter().cloned().collect();
        if symbols.is_empty() {
            return Ok(());
        }
        self.unsubscribe(&symbols).await
    }

    pub async fn subscribed_symbols(&self) -> HashSet<String> {
        self.subscribed.lock().await.clone()
    }

    pub async fn current_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.inner
            .aggregator
            .lock()
            .await
            .current_candle(symbol, timeframe)
    }

    pub async fn current_candles(&self, symbol: &str) -> HashMap<Timeframe, Candle> {
        self.inner.aggregator.lock().await.current_candles(symbol)
    }

    /// Historical closed candles from the store, most-recent-first.
    pub async fn historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Vec<Candle>> {
        self.inner.repo.get_candles(symbol, timeframe, limit).await
    }

    /// Unsubscribe everything and flush in-progress candles as closed.
    pub async fn shutdown(&self) {
        if let Err(e) = self.unsubscribe_all().await {
            error!("Unsubscribe during shutdown failed: {}", e);
        }
        let flushed = self.inner.aggregator.lock().await.flush_all();
        for candle in flushed {
            self.inner.emit_closed_candle(candle).await;
        }
        info!("Market data service shutdown complete");
    }
}
