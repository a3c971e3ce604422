//! Logging setup.
//!
//! Events go to a log file and to stderr, so stdout stays free for command
//! output. Filtering follows `RUST_LOG` and defaults to `info`.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "tilekeep.log";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
  _file_guard: WorkerGuard,
}

/// Initialize logging into `log_dir`, appending to the log file.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
  let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking_file)
    .with_ansi(false);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .compact();

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(LoggingGuard {
    _file_guard: file_guard,
  })
}

/// Default log directory: $XDG_STATE_HOME/tilekeep, falling back to the data directory.
pub fn default_log_dir() -> Result<PathBuf> {
  log_dir_from(dirs::state_dir(), dirs::data_dir(), dirs::home_dir())
}

fn log_dir_from(
  state: Option<PathBuf>,
  data: Option<PathBuf>,
  home: Option<PathBuf>,
) -> Result<PathBuf> {
  let base = state
    .or(data)
    .or_else(|| home.map(|p| p.join(".local/state")))
    .ok_or_else(|| eyre!("Could not determine log directory"))?;

  Ok(base.join("tilekeep"))
}
