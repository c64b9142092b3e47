//! Tracing initialization.
//!
//! Uses `tracing-subscriber` with an `EnvFilter`: `RUST_LOG` wins when set,
//! otherwise the configured level applies. Three output formats are
//! supported (pretty, compact, JSON).
//!
//! # Example
//! ```no_run
//! use isov::config::IsovConfig;
//! use isov::logging;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IsovConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("started");
//! # Ok(())
//! # }
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::IsovConfig;
use crate::error::{IsovError, Result};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include span close events
    pub with_span_events: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (ignored for JSON)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Create logging config from the device configuration
    pub fn from_config(config: &IsovConfig) -> Result<Self> {
        Ok(Self {
            level: parse_log_level(&config.device.log_level)?,
            ..Default::default()
        })
    }

    /// Create logging config with a custom level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the device configuration
pub fn init_from_config(config: &IsovConfig) -> Result<()> {
    init(LoggingConfig::from_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, which keeps it safe to call from tests.
pub fn init(config: LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| accept_already_initialized(&e.to_string()))
}

/// An already-installed global dispatcher is expected in tests; anything
/// else is a real failure.
fn accept_already_initialized(message: &str) -> Result<()> {
    if message.contains("a global default trace dispatcher has already been set") {
        Ok(())
    } else {
        Err(IsovError::Logging {
            message: message.to_string(),
        })
    }
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(IsovError::InvalidConfig {
            message: format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                level
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_logging_config_from_device_config() {
        let mut config = IsovConfig::default();
        config.device.log_level = "debug".to_string();

        let logging = LoggingConfig::from_config(&config).unwrap();
        assert_eq!(logging.level, Level::DEBUG);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_ansi(false);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }

    #[test]
    fn test_only_already_initialized_is_accepted() {
        assert!(accept_already_initialized(
            "a global default trace dispatcher has already been set"
        )
        .is_ok());

        let err = accept_already_initialized(
            "attempted to set a logger after the logging system was already initialized",
        )
        .unwrap_err();
        assert!(matches!(err, IsovError::Logging { .. }));
    }
}
