use clap::Parser;
use kortrade::application::strategies::StrategyRegistry;
use kortrade::application::system::Application;
use kortrade::config::{BrokerType, Mode, Settings};
use kortrade::infrastructure::logging;
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{error, info};

/// Automated equities trading system for Korean brokerage accounts.
#[derive(Debug, Parser)]
#[command(name = "kortrade", version, about)]
struct Cli {
    /// Trading mode (default: from config)
    #[arg(long, value_parser = ["live", "paper", "test"])]
    mode: Option<String>,

    /// Broker type (default: from config)
    #[arg(long, value_parser = ["real", "mock"])]
    broker: Option<String>,

    /// Account number (default: from config)
    #[arg(long)]
    account: Option<String>,

    /// Database path (default: from config)
    #[arg(long)]
    db: Option<String>,

    /// Log level (default: from config)
    #[arg(long, value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    log_level: Option<String>,

    /// Strategy name to run; see --list-strategies
    #[arg(long)]
    strategy: Option<String>,

    /// List available strategies and exit
    #[arg(long)]
    list_strategies: bool,
}

fn apply_cli_overrides(cli: &Cli, settings: &mut Settings) -> anyhow::Result<()> {
    if let Some(mode) = &cli.mode {
        settings.mode = Mode::from_str(mode)?;
    }
    if let Some(broker) = &cli.broker {
        settings.broker.broker_type = BrokerType::from_str(broker)?;
    }
    if let Some(account) = &cli.account {
        settings.broker.account_number = account.clone();
    }
    if let Some(db) = &cli.db {
        settings.database.path = db.into();
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level = match level.as_str() {
            "WARNING" => "WARN".to_string(),
            other => other.to_string(),
        };
    }
    if let Some(strategy) = &cli.strategy {
        settings.strategy = strategy.clone();
    }
    Ok(())
}

// Single-threaded cooperative core: every component interleaves only at
// await points, never across OS threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let registry = StrategyRegistry::with_builtins();
    if cli.list_strategies {
        println!("Available strategies:");
        for name in registry.available() {
            println!("  - {name}");
        }
        return ExitCode::SUCCESS;
    }

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = apply_cli_overrides(&cli, &mut settings) {
        eprintln!("Invalid arguments: {e:#}");
        return ExitCode::FAILURE;
    }
    if settings.mode == Mode::Test {
        settings.broker.broker_type = BrokerType::Mock;
    }

    let _log_guards = match logging::init(&settings.logging) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Starting kortrade {} (mode={:?}, broker={:?}, strategy={})",
        env!("CARGO_PKG_VERSION"),
        settings.mode,
        settings.broker.broker_type,
        settings.strategy
    );

    let app = match Application::build(settings, None, None, &registry).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to build application: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(status) => {
            info!("Run finished with status {status}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
