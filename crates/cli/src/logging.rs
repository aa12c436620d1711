//! Logging setup for the relay binary

use std::path::PathBuf;

use dbrelay::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Get the log directory (respects DATA_DIR / XDG_DATA_HOME)
pub fn log_dir() -> PathBuf {
  dbrelay::dirs::default_data_dir()
}

/// Console logging for short-lived commands
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
    .with_writer(std::io::stderr)
    .init();
}

fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Logging for a long-running node.
///
/// In the foreground logs go to the console with colors, otherwise to a
/// rolling file under the data directory. The returned guard must be kept
/// alive until exit.
pub fn init_node_logging(config: &LoggingConfig, foreground: bool) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy();

  if foreground {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let log_dir = log_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_cli_logging();
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, "dbrelay.log"),
    "never" => tracing_appender::rolling::never(&log_dir, "dbrelay.log"),
    _ => tracing_appender::rolling::daily(&log_dir, "dbrelay.log"),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
