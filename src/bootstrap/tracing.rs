//! Tracing configuration
//!
//! Installs a `tracing-subscriber` registry with an environment filter and a
//! stdout formatter, plus a non-blocking file layer when a log directory is
//! configured.

use std::{fs, io, path::Path, sync::OnceLock};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, registry, EnvFilter};

use crate::bootstrap::config::LoggingConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn is_development() -> bool {
    cfg!(debug_assertions)
}

/// Default filter directives, used when `RUST_LOG` is unset.
fn build_filter_directives(is_dev: bool) -> Vec<String> {
    let level = if is_dev { "debug" } else { "info" };
    vec![
        level.to_string(),
        format!("vs_app={level}"),
        format!("vs_platform={level}"),
        "webrtc=warn".to_string(),
        "webrtc_ice=warn".to_string(),
        "webrtc_sctp=warn".to_string(),
        "tungstenite=info".to_string(),
        "hyper=info".to_string(),
        "reqwest=info".to_string(),
    ]
}

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns `Err` if a subscriber is already registered or the log directory
/// cannot be created. Call once, before the runtime starts.
pub fn init_tracing_subscriber(logging: &LoggingConfig) -> anyhow::Result<()> {
    let directives = build_filter_directives(is_development());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    let stdout_layer = fmt::layer()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_ansi(cfg!(not(test)))
        .with_writer(BoxMakeWriter::new(io::stdout));

    let file_layer = match &logging.directory {
        Some(directory) => Some(
            fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_ansi(false)
                .with_writer(build_file_writer(directory, &logging.file_name)?),
        ),
        None => None,
    };

    registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

fn build_file_writer(directory: &Path, file_name: &str) -> anyhow::Result<NonBlocking> {
    fs::create_dir_all(directory)?;
    let file_appender = tracing_appender::rolling::daily(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    LOG_GUARD
        .set(guard)
        .map_err(|_| anyhow::anyhow!("Tracing log guard already initialized"))?;

    Ok(non_blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_directives() {
        let dev = build_filter_directives(true);
        assert!(dev.contains(&"debug".to_string()));
        assert!(dev.contains(&"vs_platform=debug".to_string()));
        assert!(dev.contains(&"webrtc=warn".to_string()));

        let prod = build_filter_directives(false);
        assert!(prod.contains(&"info".to_string()));
        assert!(prod.contains(&"vs_app=info".to_string()));
    }

    #[test]
    fn test_directives_parse_as_filter() {
        let directives = build_filter_directives(false).join(",");
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
