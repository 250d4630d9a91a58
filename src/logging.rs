//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Production mode writes JSON lines to `<data>/logs/<component>.jsonl` with
//! daily rotation, alongside a human-readable console layer on stderr.
//! One-shot CLI subcommands get the console layer only.
//!
//! Filtering is controlled by `RUST_LOG` (default `info`) in both modes.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard for file logging.
///
/// Must be kept alive for the process lifetime; dropping it flushes pending
/// entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise production logging for a component.
///
/// Log files land in `logs_dir` as `<component>.jsonl.YYYY-MM-DD`, one line
/// per event, rotated daily.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: &Path, component: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender =
        tracing_appender::rolling::daily(logs_dir, format!("{component}.jsonl"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise console-only logging for one-shot subcommands.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
