//! Structured logging and tracing for the EVSE engine
//!
//! Logging is configured once per process from [`LoggingConfig`]. Console
//! output is always available; a daily-rotated log file is added unless the
//! process runs under test or `EVSE_DISABLE_FILE_LOG` is set.

mod level;
mod state;
mod structured;

pub use level::{level_rank, min_level, parse_log_level};
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

use crate::config::LoggingConfig;
use crate::error::{EvseError, Result};
use state::{INIT_ERROR, INIT_ONCE, LOG_GUARD};
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let base_level = parse_log_level(&config.level)?;

            let console_level = config
                .console_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);
            let file_level = config
                .file_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);

            let filter = build_env_filter(min_level(console_level, file_level));

            if should_use_console_only() {
                init_console_only_logging(filter, config.json_format, console_level);
                return Ok(());
            }

            init_file_logging(config, filter, console_level, file_level)
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(EvseError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("evse_engine={},evse_sim={}", level, level).into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os("EVSE_DISABLE_FILE_LOG").is_some()
}

fn console_layer<S>(json_format: bool, level: Level) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    if json_format {
        layer
            .json()
            .with_filter(LevelFilter::from_level(level))
            .boxed()
    } else {
        layer.with_filter(LevelFilter::from_level(level)).boxed()
    }
}

fn init_console_only_logging(filter: EnvFilter, json_format: bool, console_level: Level) {
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(json_format, console_level))
        .try_init()
        .is_ok();

    if installed {
        info!(
            "Logging initialized - console_level: {:?}, console-only",
            console_level
        );
    }
}

fn init_file_logging(
    config: &LoggingConfig,
    filter: EnvFilter,
    console_level: Level,
    file_level: Level,
) -> Result<()> {
    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("evse")
        .filename_suffix("log")
        .max_log_files(config.backup_count as usize)
        .build({
            // A path with an extension names a file; log into its directory
            let p = Path::new(&config.file);
            if p.extension().is_some() {
                p.parent().unwrap_or(p)
            } else {
                p
            }
        })
        .map_err(|e| EvseError::io(format!("Failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json()
                .with_filter(LevelFilter::from_level(file_level))
                .boxed()
        } else {
            base.with_filter(LevelFilter::from_level(file_level))
                .boxed()
        }
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    let result = if config.console_output {
        subscriber
            .with(console_layer(config.json_format, console_level))
            .try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|e| EvseError::config(format!("Failed to install subscriber: {}", e)))?;

    info!(
        "Logging initialized - console_level: {:?}, file_level: {:?}, file: {}",
        console_level, file_level, config.file
    );
    Ok(())
}
