use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{EnvFilter, filter_fn};
use tracing_subscriber::prelude::*;

/// Target for the structured trade stream. Order/fill records logged with
/// this target land in trades.log and nowhere else.
pub const TRADES_TARGET: &str = "trades";

/// Wire up the three log streams: app.log (everything), errors.log (ERROR
/// and up), trades.log (structured order/fill records), plus the console.
/// Returns the appender guards; dropping them flushes and stops the writers.
pub fn init(config: &LoggingConfig) -> Result<Vec<WorkerGuard>> {
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("Invalid log level: {}", config.level))?;
    let json = config.json_format;

    let (app_writer, app_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&config.log_dir, "app.log"));
    let (error_writer, error_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::never(&config.log_dir, "errors.log"),
    );
    let (trade_writer, trade_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::never(&config.log_dir, "trades.log"),
    );

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(filter_fn(|meta| meta.target() != TRADES_TARGET))
        .with_filter(console_filter)
        .boxed();

    let app_layer = file_layer(app_writer, json)
        .with_filter(filter_fn(move |meta| {
            meta.target() != TRADES_TARGET && *meta.level() <= level
        }))
        .boxed();

    let error_layer = file_layer(error_writer, json)
        .with_filter(filter_fn(|meta| *meta.level() <= Level::ERROR))
        .boxed();

    let trade_layer = file_layer(trade_writer, json)
        .with_filter(filter_fn(|meta| meta.target() == TRADES_TARGET))
        .boxed();

    tracing_subscriber::registry()
        .with(console_layer)
        .with(app_layer)
        .with(error_layer)
        .with(trade_layer)
        .init();

    Ok(vec![app_guard, error_guard, trade_guard])
}

fn file_layer<S>(
    writer: tracing_appender::non_blocking::NonBlocking,
    json: bool,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    }
}
