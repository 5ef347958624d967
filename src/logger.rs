//! Logging setup.
//!
//! Installs a [`fern`] dispatcher writing to stderr and, when configured, a
//! log file. Initialization is guarded so embedding applications can call it
//! more than once without tripping the global logger.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;

use crate::config::LoggingConfig;

static INIT: OnceCell<()> = OnceCell::new();

/// Initializes logging according to configuration. Subsequent calls are
/// no-ops.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let config = config.clone();
    INIT.get_or_try_init(|| -> Result<()> {
        let mut dispatch = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{} {} {}] {}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(std::io::stderr());

        if let Some(path) = &config.file {
            let file = fern::log_file(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            dispatch = dispatch.chain(file);
        }

        dispatch.apply().context("failed to install logger")?;
        Ok(())
    })?;
    Ok(())
}
