use serde::Deserialize;
use std::{fs::File, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    filter::{EnvFilter, ParseError},
    fmt,
    prelude::*,
    util::TryInitError,
    Registry,
};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
    #[default]
    Plain,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

/// Logging settings, usually embedded in a host's configuration file.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogConfig {
    /// Base level, e.g. "info" or "debug". Unknown values fall back to "info".
    pub level: String,
    /// Extra `EnvFilter` directives appended to the base level,
    /// e.g. "msgboard_connector::workers=trace,reqwest=warn".
    pub directives: Option<String>,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Required when `output` is `file`.
    pub file_path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: None,
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("log output is 'file' but 'file_path' is not specified")]
    MissingFilePath,

    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid filter directive: {0}")]
    InvalidDirective(#[from] ParseError),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized(#[from] TryInitError),
}

impl LogConfig {
    fn filter(&self) -> Result<EnvFilter, LoggerError> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);
        let mut filter = level.as_str().to_lowercase();
        if let Some(extra) = self.directives.as_deref().filter(|d| !d.trim().is_empty()) {
            filter.push(',');
            filter.push_str(extra.trim());
        }
        Ok(EnvFilter::try_new(filter)?)
    }
}

/// Installs the global subscriber described by `config`.
///
/// Returns [`LoggerError::AlreadyInitialized`] instead of panicking when a
/// subscriber is already in place, so test harnesses can call it repeatedly.
pub fn init(config: &LogConfig) -> Result<(), LoggerError> {
    let filter = config.filter()?;
    let subscriber = Registry::default().with(filter);

    match config.output {
        LogOutput::File => {
            let file_path = config
                .file_path
                .as_deref()
                .ok_or(LoggerError::MissingFilePath)?;
            let log_file = Arc::new(File::create(file_path)?);

            match config.format {
                LogFormat::Json => subscriber
                    .with(fmt::layer().with_writer(log_file).with_ansi(false).json())
                    .try_init()?,
                LogFormat::Compact => subscriber
                    .with(fmt::layer().with_writer(log_file).with_ansi(false).compact())
                    .try_init()?,
                LogFormat::Plain => subscriber
                    .with(fmt::layer().with_writer(log_file).with_ansi(false).pretty())
                    .try_init()?,
            }
        }
        LogOutput::Stdout => match config.format {
            LogFormat::Json => subscriber
                .with(fmt::layer().with_writer(std::io::stdout).json())
                .try_init()?,
            LogFormat::Compact => subscriber
                .with(fmt::layer().with_writer(std::io::stdout).compact())
                .try_init()?,
            LogFormat::Plain => subscriber
                .with(fmt::layer().with_writer(std::io::stdout).pretty())
                .try_init()?,
        },
    };

    Ok(())
}
