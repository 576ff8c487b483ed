use super::env_parse;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Risk limits applied to every signal before an order is created. All
/// ratio fields are exact decimals; share counts truncate downward.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Maximum absolute shares held per symbol.
    pub max_position_size: i64,
    /// Ceiling on total position value / equity.
    pub max_portfolio_exposure_pct: Decimal,
    /// Daily loss (currency units) beyond which new orders are rejected.
    pub daily_loss_limit: Decimal,
    pub trading_start_hour: u32,
    pub trading_start_minute: u32,
    pub trading_end_hour: u32,
    pub trading_end_minute: u32,
    /// Fee rate on trade notional (0.00015 = 0.015%). Must be in [0, 0.02].
    pub transaction_cost_rate: Decimal,
    /// Orders allowed per calendar day, in [1, 1000].
    pub max_trades_per_day: u32,
    /// Equity fraction per trade when a signal has no suggested quantity,
    /// in [0.01, 0.5].
    pub position_size_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: 1000,
            max_portfolio_exposure_pct: dec!(0.8),
            daily_loss_limit: dec!(1000000),
            trading_start_hour: 9,
            trading_start_minute: 0,
            trading_end_hour: 15,
            trading_end_minute: 30,
            transaction_cost_rate: dec!(0.00015),
            max_trades_per_day: 50,
            position_size_pct: dec!(0.05),
        }
    }
}

impl RiskConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            max_position_size: env_parse("RISK__MAX_POSITION_SIZE", defaults.max_position_size)?,
            max_portfolio_exposure_pct: env_parse(
                "RISK__MAX_PORTFOLIO_EXPOSURE_PCT",
                defaults.max_portfolio_exposure_pct,
            )?,
            daily_loss_limit: env_parse("RISK__DAILY_LOSS_LIMIT", defaults.daily_loss_limit)?,
            trading_start_hour: env_parse("RISK__TRADING_START_HOUR", defaults.trading_start_hour)?,
            trading_start_minute: env_parse(
                "RISK__TRADING_START_MINUTE",
                defaults.trading_start_minute,
            )?,
            trading_end_hour: env_parse("RISK__TRADING_END_HOUR", defaults.trading_end_hour)?,
            trading_end_minute: env_parse("RISK__TRADING_END_MINUTE", defaults.trading_end_minute)?,
            transaction_cost_rate: env_parse(
                "RISK__TRANSACTION_COST_RATE",
                defaults.transaction_cost_rate,
            )?,
            max_trades_per_day: env_parse("RISK__MAX_TRADES_PER_DAY", defaults.max_trades_per_day)?,
            position_size_pct: env_parse("RISK__POSITION_SIZE_PCT", defaults.position_size_pct)?,
        };
        config.validate().context("Invalid risk configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_cost_rate < Decimal::ZERO || self.transaction_cost_rate > dec!(0.02) {
            anyhow::bail!(
                "transaction_cost_rate must be in [0, 0.02], got {}",
                self.transaction_cost_rate
            );
        }
        if !(1..=1000).contains(&self.max_trades_per_day) {
            anyhow::bail!(
                "max_trades_per_day must be in [1, 1000], got {}",
                self.max_trades_per_day
            );
        }
        if self.position_size_pct < dec!(0.01) || self.position_size_pct > dec!(0.5) {
            anyhow::bail!(
                "position_size_pct must be in [0.01, 0.5], got {}",
                self.position_size_pct
            );
        }
        if self.trading_start_hour > 23 || self.trading_end_hour > 23 {
            anyhow::bail!("trading hours must be within a day");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        RiskConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = RiskConfig::default();
        config.transaction_cost_rate = dec!(0.05);
        assert!(config.validate().is_err());

        let mut config = RiskConfig::default();
        config.max_trades_per_day = 0;
        assert!(config.validate().is_err());

        let mut config = RiskConfig::default();
        config.position_size_pct = dec!(0.6);
        assert!(config.validate().is_err());
    }
}
