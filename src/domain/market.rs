use crate::domain::errors::TickError;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval. Sub-day boundaries are minute-aligned, daily candles
/// open at midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn to_seconds(&self) -> i64 {
        self.to_minutes() * 60
    }

    /// Canonical string used in persistence and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::ThirtyMin => "30m",
            Timeframe::OneHour => "60m",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    /// Default set the aggregator maintains per symbol.
    pub fn default_set() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
        ]
    }

    /// Floor a timestamp to the open time of the period containing it.
    pub fn open_time(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let aligned = secs - secs.rem_euclid(self.to_seconds());
        Utc.timestamp_opt(aligned, 0).single().unwrap_or(timestamp)
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "30m" | "30min" => Ok(Timeframe::ThirtyMin),
            "60m" | "1h" | "1hour" => Ok(Timeframe::OneHour),
            "4h" | "240m" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            _ => anyhow::bail!(
                "Invalid timeframe: '{}'. Valid options: 1m, 5m, 15m, 30m, 60m, 4h, 1d",
                s
            ),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single trade print. Construction validates price and volume; bad ticks
/// never enter the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        volume: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, TickError> {
        if price <= Decimal::ZERO {
            return Err(TickError::NonPositivePrice(price));
        }
        if volume < 0 {
            return Err(TickError::NegativeVolume(volume));
        }
        Ok(Self {
            symbol: symbol.into(),
            price,
            volume,
            timestamp,
        })
    }
}

/// OHLCV bar over a fixed time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl Candle {
    pub fn from_tick(tick: &Tick, timeframe: Timeframe, open_time: DateTime<Utc>) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timeframe,
            open_time,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
        }
    }

    /// Fold a tick into the in-progress bar.
    pub fn update(&mut self, tick: &Tick) {
        if tick.price > self.high {
            self.high = tick.price;
        }
        if tick.price < self.low {
            self.low = tick.price;
        }
        self.close = tick.price;
        self.volume += tick.volume;
    }
}
