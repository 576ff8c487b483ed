use crate::application::execution::idempotency::signal_id;
use crate::application::strategies::{MarketSnapshot, Strategy, StrategyContext};
use crate::domain::market::{Candle, Timeframe};
use crate::domain::signal::{Signal, SignalAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Mutex;

/// Exponential moving average. Entries before the warmup period are 0.0.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());
    let mut ema_val = 0.0;
    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(0.0);
        } else if i + 1 == period {
            ema_val = values[..period].iter().sum::<f64>() / period as f64;
            result.push(ema_val);
        } else {
            ema_val = (value - ema_val) * multiplier + ema_val;
            result.push(ema_val);
        }
    }
    result
}

/// RSI with Wilder's smoothing. Warmup entries are pinned at 50.0.
pub fn rsi_wilders(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period + 1 {
        return vec![50.0; values.len()];
    }
    let mut result = vec![50.0; values.len()];
    let mut gains = vec![0.0];
    let mut losses = vec![0.0];
    for window in values.windows(2) {
        let delta = window[1] - window[0];
        gains.push(delta.max(0.0));
        losses.push((-delta).max(0.0));
    }

    let mut avg_gain = gains[1..=period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    for i in period + 1..values.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Chronological close prices from a most-recent-first candle slice.
fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .rev()
        .filter_map(|c| c.close.to_f64())
        .collect()
}

fn highs(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .rev()
        .filter_map(|c| c.high.to_f64())
        .collect()
}

fn opens(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .rev()
        .filter_map(|c| c.open.to_f64())
        .collect()
}

fn lows(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .rev()
        .filter_map(|c| c.low.to_f64())
        .collect()
}

/// Trend-following pullback continuation.
///
/// Higher timeframe (60m) gates the trend: EMA50 above EMA200 with RSI14
/// at or above 40. Entries fire on the lower timeframe (5m, falling back
/// to 1m) when RSI crosses up through 40, price reclaims EMA20 and breaks
/// the recent swing high — unless the last buy for the symbol is inside
/// the cooldown window. Exits fire on an RSI cross down through 50 or a
/// close below EMA20.
pub struct PullbackStrategy {
    cooldown_minutes: i64,
    swing_lookback: usize,
    last_buy_time: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PullbackStrategy {
    pub fn new() -> Self {
        Self::with_params(30, 10)
    }

    pub fn with_params(cooldown_minutes: i64, swing_lookback: usize) -> Self {
        Self {
            cooldown_minutes,
            swing_lookback,
            last_buy_time: Mutex::new(HashMap::new()),
        }
    }

    fn make_signal(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        action: SignalAction,
        confidence: f64,
        reason: &str,
        metadata: serde_json::Value,
    ) -> Signal {
        Signal {
            signal_id: signal_id(self.name(), symbol, timestamp),
            strategy_name: self.name().to_string(),
            symbol: symbol.to_string(),
            action,
            confidence,
            reason: reason.to_string(),
            suggested_quantity: None,
            metadata,
            timestamp,
        }
    }
}

impl Default for PullbackStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for PullbackStrategy {
    fn name(&self) -> &str {
        "pullback_v1"
    }

    fn symbols(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_market_data(
        &self,
        snapshot: &MarketSnapshot,
        context: &StrategyContext,
    ) -> anyhow::Result<Vec<Signal>> {
        let symbol = &snapshot.symbol;
        let now = snapshot.timestamp;

        let in_universe = context
            .metadata
            .get("universe")
            .and_then(|u| u.as_array())
            .is_some_and(|u| u.iter().any(|s| s.as_str() == Some(symbol)));
        if !in_universe || !context.is_market_open {
            return Ok(Vec::new());
        }

        let htf = snapshot
            .historical_candles
            .get(&Timeframe::OneHour)
            .map(|c| c.as_slice())
            .unwrap_or_default();
        let mut ltf_key = Timeframe::FiveMin;
        let mut ltf = snapshot
            .historical_candles
            .get(&ltf_key)
            .map(|c| c.as_slice())
            .unwrap_or_default();
        if ltf.is_empty() {
            ltf_key = Timeframe::OneMin;
            ltf = snapshot
                .historical_candles
                .get(&ltf_key)
                .map(|c| c.as_slice())
                .unwrap_or_default();
        }

        let htf_closes = closes(htf);
        let ltf_closes = closes(ltf);
        let min_htf = 200;
        let min_ltf = 20.max(self.swing_lookback + 2);

        if htf_closes.len() < min_htf || ltf_closes.len() < min_ltf {
            return Ok(vec![self.make_signal(
                symbol,
                now,
                SignalAction::Hold,
                0.0,
                "insufficient_data",
                serde_json::json!({
                    "htf_candles": htf_closes.len(),
                    "ltf_candles": ltf_closes.len(),
                }),
            )]);
        }

        let htf_ema20 = *ema(&htf_closes, 20).last().unwrap_or(&0.0);
        let htf_ema50 = *ema(&htf_closes, 50).last().unwrap_or(&0.0);
        let htf_ema200 = *ema(&htf_closes, 200).last().unwrap_or(&0.0);
        let htf_rsi = *rsi_wilders(&htf_closes, 14).last().unwrap_or(&50.0);
        let htf_close = *htf_closes.last().unwrap_or(&0.0);

        let ltf_ema20 = *ema(&ltf_closes, 20).last().unwrap_or(&0.0);
        let ltf_rsi_series = rsi_wilders(&ltf_closes, 14);
        let ltf_rsi = *ltf_rsi_series.last().unwrap_or(&50.0);
        let ltf_rsi_prev = if ltf_rsi_series.len() >= 2 {
            ltf_rsi_series[ltf_rsi_series.len() - 2]
        } else {
            50.0
        };
        let ltf_close = *ltf_closes.last().unwrap_or(&0.0);

        let ltf_highs = highs(ltf);
        let swing_end = ltf_highs.len().saturating_sub(1);
        let swing_start = swing_end.saturating_sub(self.swing_lookback);
        let swing_high = if swing_start < swing_end {
            ltf_highs[swing_start..swing_end]
                .iter()
                .cloned()
                .fold(f64::MIN, f64::max)
        } else {
            ltf_close
        };

        let cooldown_active = self
            .last_buy_time
            .lock()
            .unwrap()
            .get(symbol)
            .is_some_and(|last| (now - *last).num_minutes() < self.cooldown_minutes);

        let base_metadata = serde_json::json!({
            "htf_ema20": htf_ema20,
            "htf_ema50": htf_ema50,
            "htf_ema200": htf_ema200,
            "htf_rsi14": htf_rsi,
            "ltf_ema20": ltf_ema20,
            "ltf_rsi14": ltf_rsi,
            "swing_high": swing_high,
            "ltf": ltf_key.as_str(),
            "cooldown_active": cooldown_active,
        });

        if htf_ema50 <= 0.0 || htf_ema200 <= 0.0 {
            return Ok(vec![self.make_signal(
                symbol,
                now,
                SignalAction::Hold,
                0.0,
                "invalid_ema",
                base_metadata,
            )]);
        }

        let trend_ok = htf_ema50 > htf_ema200 && htf_rsi >= 40.0;
        if !trend_ok {
            return Ok(vec![self.make_signal(
                symbol,
                now,
                SignalAction::Hold,
                0.0,
                "trend_filter_fail",
                base_metadata,
            )]);
        }

        // Pullback zone: price inside the EMA20/EMA50 band with 1% tolerance,
        // and no expanding two-bar bearish collapse.
        let band_low = htf_ema20.min(htf_ema50);
        let band_high = htf_ema20.max(htf_ema50);
        let tolerance = 0.01 * band_high;
        let in_zone = (band_low - tolerance) <= htf_close && htf_close <= (band_high + tolerance);

        let htf_opens = opens(htf);
        let htf_highs = highs(htf);
        let htf_lows = lows(htf);
        let n = htf_closes.len();
        let collapse = n >= 3 && {
            let bearish1 = htf_closes[n - 1] < htf_opens[n - 1];
            let bearish2 = htf_closes[n - 2] < htf_opens[n - 2];
            let range = |i: usize| htf_highs[i] - htf_lows[i];
            bearish1 && bearish2 && range(n - 1) > range(n - 2) && range(n - 2) > range(n - 3)
        };

        if !in_zone || collapse {
            return Ok(vec![self.make_signal(
                symbol,
                now,
                SignalAction::Hold,
                0.0,
                "no_pullback",
                base_metadata,
            )]);
        }

        let exit_rsi_cross_down = ltf_rsi_prev >= 50.0 && ltf_rsi < 50.0;
        let exit_below_ema = ltf_close < ltf_ema20;
        if exit_rsi_cross_down || exit_below_ema {
            return Ok(vec![self.make_signal(
                symbol,
                now,
                SignalAction::Sell,
                0.6,
                "exit_trigger",
                base_metadata,
            )]);
        }

        let entry_rsi_cross_up = ltf_rsi_prev < 40.0 && ltf_rsi >= 40.0;
        let entry_above_ema = ltf_close > ltf_ema20;
        let entry_break_swing = ltf_close > swing_high;

        if entry_rsi_cross_up && entry_above_ema && entry_break_swing && !cooldown_active {
            let mut confidence: f64 = 0.6;
            if htf_ema50 / htf_ema200 > 1.02 {
                confidence += 0.1;
            }
            if htf_rsi >= 50.0 {
                confidence += 0.1;
            }
            self.last_buy_time
                .lock()
                .unwrap()
                .insert(symbol.clone(), now);

            return Ok(vec![self.make_signal(
                symbol,
                now,
                SignalAction::Buy,
                confidence.clamp(0.0, 1.0),
                "entry_trigger",
                base_metadata,
            )]);
        }

        Ok(vec![self.make_signal(
            symbol,
            now,
            SignalAction::Hold,
            0.0,
            "hold",
            base_metadata,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::Portfolio;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ema_warmup_and_seed() {
        let values: Vec<f64> = (1..=5).map(|v| v as f64).collect();
        let result = ema(&values, 3);
        assert_eq!(result.len(), 5);
        assert_eq!(result[0], 0.0);
        assert_eq!(result[1], 0.0);
        // Seed is the SMA of the first 3 values
        assert!((result[2] - 2.0).abs() < 1e-9);
        // EMA(4) = (4 - 2) * 0.5 + 2 = 3
        assert!((result[3] - 3.0).abs() < 1e-9);
        assert!((result[4] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_bounds_and_monotone_series() {
        let rising: Vec<f64> = (1..=30).map(|v| v as f64).collect();
        let rsi = rsi_wilders(&rising, 14);
        assert_eq!(*rsi.last().unwrap(), 100.0);

        let falling: Vec<f64> = (1..=30).rev().map(|v| v as f64).collect();
        let rsi = rsi_wilders(&falling, 14);
        assert!(*rsi.last().unwrap() < 1.0);

        for value in rsi {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_rsi_short_series_is_neutral() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(rsi_wilders(&values, 14), vec![50.0, 50.0, 50.0]);
    }

    fn snapshot_with(
        symbol: &str,
        htf_count: usize,
        ltf_count: usize,
    ) -> MarketSnapshot {
        let base = Utc.timestamp_opt(1_704_067_200, 0).unwrap();
        // Most-recent-first, matching how the store serves history.
        let make = |tf: Timeframe, count: usize| -> Vec<Candle> {
            (0..count)
                .map(|i| Candle {
                    symbol: symbol.to_string(),
                    timeframe: tf,
                    open_time: tf.open_time(base) - chrono::Duration::seconds(i as i64 * tf.to_seconds()),
                    open: dec!(100),
                    high: dec!(101),
                    low: dec!(99),
                    close: dec!(100) + Decimal::from((count - i) % 3),
                    volume: 10,
                })
                .collect()
        };
        let mut historical = HashMap::new();
        historical.insert(Timeframe::OneHour, make(Timeframe::OneHour, htf_count));
        historical.insert(Timeframe::FiveMin, make(Timeframe::FiveMin, ltf_count));
        MarketSnapshot {
            symbol: symbol.to_string(),
            timestamp: base,
            last_tick: None,
            current_candles: HashMap::new(),
            historical_candles: historical,
        }
    }

    fn context_for(symbol: &str, market_open: bool) -> StrategyContext {
        StrategyContext {
            portfolio: Portfolio::new(),
            active_orders_count: 0,
            daily_trades_count: 0,
            is_market_open: market_open,
            metadata: serde_json::json!({"universe": [symbol]}),
        }
    }

    #[tokio::test]
    async fn test_symbol_outside_universe_yields_nothing() {
        let strategy = PullbackStrategy::new();
        let snapshot = snapshot_with("005930", 10, 10);
        let mut context = context_for("005930", true);
        context.metadata = serde_json::json!({"universe": ["000660"]});

        let signals = strategy.on_market_data(&snapshot, &context).await.unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_closed_market_yields_nothing() {
        let strategy = PullbackStrategy::new();
        let snapshot = snapshot_with("005930", 210, 30);
        let context = context_for("005930", false);

        let signals = strategy.on_market_data(&snapshot, &context).await.unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_data_holds() {
        let strategy = PullbackStrategy::new();
        let snapshot = snapshot_with("005930", 50, 30);
        let context = context_for("005930", true);

        let signals = strategy.on_market_data(&snapshot, &context).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Hold);
        assert_eq!(signals[0].reason, "insufficient_data");
    }

    #[tokio::test]
    async fn test_flat_series_fails_trend_filter() {
        // Closes oscillate 100..102 with no trend; EMA50 ~ EMA200 and RSI
        // near neutral, so the trend filter never passes.
        let strategy = PullbackStrategy::new();
        let snapshot = snapshot_with("005930", 210, 30);
        let context = context_for("005930", true);

        let signals = strategy.on_market_data(&snapshot, &context).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Hold);
        assert!(
            signals[0].reason == "trend_filter_fail" || signals[0].reason == "no_pullback",
            "unexpected reason {}",
            signals[0].reason
        );
    }
}
