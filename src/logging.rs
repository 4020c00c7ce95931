//! Tracing setup.
//!
//! Library code only emits `tracing` events; applications call [`init`] or
//! [`init_from_config`] once to install a subscriber. The filter is built
//! from the configured level, never from the process environment.
//!
//! # Example
//! ```no_run
//! use perfusion_daq::{config::PerfusionConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PerfusionConfig::load_from("config/perfusion.toml")?;
//! logging::init_from_config(&config)?;
//! info!(sensors = config.sensors.len(), "Configuration loaded");
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::PerfusionConfig;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line format with colors (for development)
    Pretty,
    /// Single-line format without colors (for long runs)
    Compact,
    /// JSON lines (for log aggregation)
    Json,
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Whether to include span events (NEW, CLOSE)
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    /// Acquisition threads are named `acq-{stream}`
    pub with_thread_names: bool,
    /// Only used by the Pretty format
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Options for the level named in `[application] log_level`
    pub fn from_config(config: &PerfusionConfig) -> Result<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the application configuration
pub fn init_from_config(config: &PerfusionConfig) -> Result<()> {
    init(LoggingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`,
/// so tests and embedding applications can call it freely.
pub fn init(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::new(config.level.as_str().to_lowercase());
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .or_else(|e| {
            // Expected in tests, where several cases initialize logging
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(anyhow!("Failed to initialize logging: {e}"))
            }
        })
}

/// Parse a log level name, case-insensitively
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);

        // Case insensitive
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);

        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_config_from_application_section() {
        let mut config = PerfusionConfig::default();
        config.application.log_level = "debug".to_string();
        assert_eq!(LoggingConfig::from_config(&config).unwrap().level, Level::DEBUG);

        config.application.log_level = "chatty".to_string();
        assert!(LoggingConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_builder() {
        let config = LoggingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_init_is_idempotent() {
        init(LoggingConfig::new(Level::DEBUG)).unwrap();
        init(LoggingConfig::new(Level::INFO).with_format(OutputFormat::Json)).unwrap();
    }
}
