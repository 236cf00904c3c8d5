//! Tracing setup: a rolling file sink plus stdout for humans, or a single
//! JSON sink for log shippers.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies capped at `warn` unless RUST_LOG says otherwise
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "reqwest", "rustls"];

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

fn default_directives(level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|t| format!("{}=warn", t)));
    directives.join(",")
}

/// Install the global subscriber. Keep the returned guard alive until exit;
/// dropping it flushes the file writer.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false).with_ansi(true))
            .init();
    }

    guard
}
