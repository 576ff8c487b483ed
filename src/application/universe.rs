use crate::domain::ports::UniverseService;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// KOSPI blue chips, the fallback when the universe service is missing or
/// returns nothing.
const KOSPI_BLUE_CHIPS: &[&str] = &[
    "005930", // Samsung Electronics
    "000660", // SK Hynix
    "373220", // LG Energy Solution
    "207940", // Samsung Biologics
    "005380", // Hyundai Motor
    "006400", // Samsung SDI
    "051910", // LG Chem
    "035420", // NAVER
    "000270", // Kia
    "105560", // KB Financial
    "055550", // Shinhan Financial
    "035720", // Kakao
    "003670", // POSCO Holdings
    "068270", // Celltrion
    "028260", // Samsung C&T
    "012330", // Hyundai Mobis
    "066570", // LG Electronics
    "003550", // LG
    "096770", // SK Innovation
    "034730", // SK
];

pub fn default_universe() -> Vec<String> {
    KOSPI_BLUE_CHIPS.iter().map(|s| s.to_string()).collect()
}

/// Fixed symbol list, used for tests and manual override. The real
/// implementation queries the brokerage's top-by-trading-value ranking.
pub struct StaticUniverse {
    symbols: Mutex<Vec<String>>,
}

impl StaticUniverse {
    pub fn new(symbols: Vec<String>) -> Self {
        info!("Static universe set: {} symbols", symbols.len());
        Self {
            symbols: Mutex::new(symbols),
        }
    }

    pub fn set_symbols(&self, symbols: Vec<String>) {
        *self.symbols.lock().unwrap() = symbols;
    }
}

#[async_trait]
impl UniverseService for StaticUniverse {
    async fn top_by_trading_value(&self, size: usize) -> anyhow::Result<Vec<String>> {
        let symbols = self.symbols.lock().unwrap();
        Ok(symbols.iter().take(size).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_universe_is_populated() {
        let universe = default_universe();
        assert_eq!(universe.len(), 20);
        assert!(universe.contains(&"005930".to_string()));
    }

    #[tokio::test]
    async fn test_static_universe_truncates() {
        let service = StaticUniverse::new(default_universe());
        let top = service.top_by_trading_value(5).await.unwrap();
        assert_eq!(top.len(), 5);
        assert_eq!(top[0], "005930");
    }
}
