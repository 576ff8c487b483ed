//! Configuration, loaded from `KORTRADE_`-prefixed environment variables
//! with `__` as the nesting delimiter (e.g. `KORTRADE_RISK__MAX_POSITION_SIZE`).
//! CLI flags override individual fields after loading.

mod risk_config;

pub use risk_config::RiskConfig;

use anyhow::{Context, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

const ENV_PREFIX: &str = "KORTRADE_";

pub(crate) fn env_var(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|value| !value.is_empty())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {ENV_PREFIX}{key}={raw}: {e}")),
        None => Ok(default),
    }
}

/// Trading mode. `test` forces the mock broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Paper,
    Test,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "paper" => Ok(Mode::Paper),
            "test" => Ok(Mode::Test),
            _ => anyhow::bail!("Invalid mode: {}. Must be 'live', 'paper' or 'test'", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerType {
    /// The real brokerage adapter, injected by the embedding binary.
    Real,
    Mock,
}

impl FromStr for BrokerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "real" | "kiwoom" => Ok(BrokerType::Real),
            "mock" => Ok(BrokerType::Mock),
            _ => anyhow::bail!("Invalid broker type: {}. Must be 'real' or 'mock'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl DatabaseConfig {
    fn from_env() -> Self {
        Self {
            path: env_var("DATABASE__PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("kortrade.db")),
        }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub broker_type: BrokerType,
    pub account_number: String,
    /// Minimum spacing between adapter TR requests.
    pub tr_rate_limit_ms: u64,
}

impl BrokerConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            broker_type: env_parse("BROKER__TYPE", BrokerType::Real)?,
            account_number: env_var("BROKER__ACCOUNT_NUMBER").unwrap_or_default(),
            tr_rate_limit_ms: env_parse("BROKER__TR_RATE_LIMIT_MS", 200)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub json_format: bool,
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env_var("LOGGING__LEVEL").unwrap_or_else(|| "INFO".to_string());
        match level.to_uppercase().as_str() {
            "DEBUG" | "INFO" | "WARNING" | "WARN" | "ERROR" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }
        Ok(Self {
            level: normalize_level(&level),
            log_dir: env_var("LOGGING__LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            json_format: env_parse("LOGGING__JSON_FORMAT", true)?,
        })
    }
}

fn normalize_level(level: &str) -> String {
    match level.to_uppercase().as_str() {
        "WARNING" => "WARN".to_string(),
        other => other.to_string(),
    }
}

/// Root application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub risk: RiskConfig,
    pub logging: LoggingConfig,
    /// Active strategy; must name a registered strategy.
    pub strategy: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mode: env_parse("MODE", Mode::Paper)?,
            database: DatabaseConfig::from_env(),
            broker: BrokerConfig::from_env().context("Failed to load broker config")?,
            risk: RiskConfig::from_env().context("Failed to load risk config")?,
            logging: LoggingConfig::from_env().context("Failed to load logging config")?,
            strategy: env_var("STRATEGY").unwrap_or_else(|| "pullback_v1".to_string()),
        })
    }
}
