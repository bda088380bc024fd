//! Logging setup
//!
//! `RUST_LOG` style filtering on stderr, plus an optional daily-rolling
//! log file. Only the binary calls this.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const DEFAULT_FILTER: &str = "forecast_agency=info";

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // stdout carries the JSON-lines event stream, so logs go to stderr
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "forecast.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Registry::default()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;
            Ok(LogGuard { _file: Some(guard) })
        }
        None => {
            Registry::default().with(filter).with(stderr).try_init()?;
            Ok(LogGuard { _file: None })
        }
    }
}
