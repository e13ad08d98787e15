use std::path::PathBuf;

use log::{LevelFilter, info};
use synapse_models::SendableError;

use crate::logger::{self, print_env};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            log_file: None,
        }
    }
}

/// Process bootstrap shared by the binaries: logger, panic hook, banner.
pub fn startup(name: &str, logging: &LoggingConfig) -> Result<(), SendableError> {
    logger::setup_logger(logging.level, logging.log_file.as_deref())?;
    log_panics::init();

    info!("--- {} ---", name);
    print_env()?;

    Ok(())
}
