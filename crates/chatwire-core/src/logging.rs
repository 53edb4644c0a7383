//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "CHATWIRE_LOG";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/chatwire/logs/`
/// Log level is controlled by the `CHATWIRE_LOG` environment variable.
///
/// # Examples
/// ```bash
/// CHATWIRE_LOG=debug chatwire --identifier alice
/// CHATWIRE_LOG=chatwire_client=trace chatwire --identifier alice
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "chatwire.log");

    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("chatwire=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("chatwire starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
///
/// Files in it rotate daily as `chatwire.log.YYYY-MM-DD`.
pub fn get_log_directory() -> Result<PathBuf> {
    log_directory_under(dirs::data_local_dir())
}

fn log_directory_under(base: Option<PathBuf>) -> Result<PathBuf> {
    let base = base.ok_or_else(|| Error::config("could not determine the local data directory"))?;
    Ok(base.join("chatwire").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_lives_under_chatwire_dir() {
        let dir = log_directory_under(Some(PathBuf::from("/data"))).unwrap();
        assert_eq!(dir, PathBuf::from("/data/chatwire/logs"));
    }

    #[test]
    fn test_missing_data_dir_is_an_error() {
        let err = log_directory_under(None).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
