//! Tracing initialization: terminal output plus an optional daily-rolling
//! log file. The returned guard must stay alive for the process lifetime
//! or buffered file output is lost.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::booru::config::LoggingSection;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid log filter: {0}")]
    Filter(String),
}

pub fn init(config: &LoggingSection) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|err| LoggerError::Filter(err.to_string()))?;

    let terminal_layer = fmt::layer().with_target(false);

    if config.log_to_file {
        let directory = Path::new(&config.log_directory);
        fs::create_dir_all(directory)?;
        let appender = tracing_appender::rolling::daily(directory, "booru_manager.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(terminal_layer)
            .with(file_layer)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(terminal_layer)
            .init();
        Ok(None)
    }
}
