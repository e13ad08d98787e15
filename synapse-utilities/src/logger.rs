use std::{env, path::Path, time::SystemTime};

use log::{LevelFilter, info};
use synapse_models::SendableError;

pub fn format_line(level: log::Level, target: &str, message: &std::fmt::Arguments) -> String {
    format!(
        "[{} {} {}] {}",
        humantime::format_rfc3339_seconds(SystemTime::now()),
        level,
        target,
        message
    )
}

fn dispatch(level: LevelFilter, log_file: Option<&Path>) -> Result<fern::Dispatch, SendableError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                format_line(record.level(), record.target(), message)
            ))
        })
        .level(level)
        .chain(std::io::stdout());
    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    Ok(dispatch)
}

/// Installs the global logger. Fails if one is already installed.
pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    dispatch(level, log_file)?.apply()?;
    Ok(())
}

pub fn print_env() -> std::io::Result<()> {
    let path = env::current_dir()?;
    info!("The current directory is {}", path.display());
    Ok(())
}
