//! Session logging setup.
//!
//! The aggregated device lines go to the consumer's stream; tracing output
//! goes to a daily-rolling file instead so the two never interleave on
//! stdout.

use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter, e.g.
/// `IOSLOG_LOG=debug` or `IOSLOG_LOG=ioslog_reader=trace`.
pub const LOG_ENV_VAR: &str = "IOSLOG_LOG";

const LOG_FILE_PREFIX: &str = "ioslog.log";
const DEFAULT_FILTER: &str = "ioslog=info,warn";

/// Initialize tracing with a rolling file under the platform data dir.
pub fn init() -> Result<()> {
    init_to(&default_log_directory())
}

/// Initialize tracing, writing daily-rotated files under `log_dir`.
///
/// The directory is created if missing. Filtering honors [`LOG_ENV_VAR`]
/// and defaults to info-level for this workspace's crates.
pub fn init_to(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("logging to {}", log_dir.display());

    Ok(())
}

/// `<platform data dir>/ioslog/logs`, falling back to the working
/// directory when the platform has no data dir.
fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ioslog")
        .join("logs")
}
