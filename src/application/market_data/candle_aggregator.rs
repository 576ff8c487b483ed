use crate::domain::market::{Candle, Tick, Timeframe};
use std::collections::HashMap;
use tracing::debug;

/// Folds ticks into one in-progress candle per (symbol, timeframe). A tick
/// landing in a new period closes the old candle and opens the next one
/// from that tick; closed candles are returned, not retained.
pub struct CandleAggregator {
    timeframes: Vec<Timeframe>,
    current: HashMap<(String, Timeframe), Candle>,
}

impl CandleAggregator {
    pub fn new(timeframes: Vec<Timeframe>) -> Self {
        Self {
            timeframes,
            current: HashMap::new(),
        }
    }

    /// Process one tick across every configured timeframe. Returns the
    /// candles that closed because of this tick.
    pub fn process_tick(&mut self, tick: &Tick) -> Vec<Candle> {
        let mut closed = Vec::new();

        for &timeframe in &self.timeframes {
            let open_time = timeframe.open_time(tick.timestamp);
            let key = (tick.symbol.clone(), timeframe);

            match self.current.get_mut(&key) {
                None => {
                    debug!(
                        "New candle started: {} {} at {}",
                        tick.symbol, timeframe, open_time
                    );
                    self.current
                        .insert(key, Candle::from_tick(tick, timeframe, open_time));
                }
                Some(candle) if candle.open_time != open_time => {
                    closed.push(candle.clone());
                    *candle = Candle::from_tick(tick, timeframe, open_time);
                }
                Some(candle) => candle.update(tick),
            }
        }

        closed
    }

    /// The in-progress candle for one symbol and timeframe.
    pub fn current_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.current.get(&(symbol.to_string(), timeframe)).cloned()
    }

    /// All in-progress candles for a symbol, keyed by timeframe.
    pub fn current_candles(&self, symbol: &str) -> HashMap<Timeframe, Candle> {
        self.current
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .map(|((_, tf), candle)| (*tf, candle.clone()))
            .collect()
    }

    /// Emit every in-progress candle as closed and clear state. Used on
    /// shutdown.
    pub fn flush_all(&mut self) -> Vec<Candle> {
        let flushed: Vec<Candle> = self.current.values().cloned().collect();
        self.current.clear();
        debug!("Flushed {} candles", flushed.len());
        flushed
    }

    /// Drop in-progress state for one symbol (on unsubscribe).
    pub fn clear_symbol(&mut self, symbol: &str) {
        self.current.retain(|(s, _), _| s != symbol);
    }
}
