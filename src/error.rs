//! Error types for the measurement engine.
//!
//! Edge-handler anomalies (a zero or over-long period) are not errors: they
//! are absorbed locally and never reach this type. Everything here is
//! surfaced to a caller of the read surface or of the lifecycle shell.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, IsovError>;

/// Errors that can occur while setting up or reading the device.
#[derive(Error, Debug)]
pub enum IsovError {
    /// Rendering the snapshot produced no bytes
    #[error("No data available: snapshot rendering produced no output")]
    NoData,

    /// The stream is read-only
    #[error("Invalid operation: the voltage stream does not accept writes")]
    InvalidOperation,

    /// Channel index outside the fixed channel range
    #[error("Invalid channel {index}: device has {max} channels")]
    InvalidChannel {
        /// Requested index
        index: usize,
        /// Number of channels
        max: usize,
    },

    /// The edge source already delivers this channel to another subscriber
    #[error("Channel {channel} is busy (edge source already subscribed)")]
    ChannelBusy {
        /// Zero-based channel index
        channel: usize,
    },

    /// The edge source could not be acquired for a channel
    #[error("Failed to acquire edge source for channel {channel}: {message}")]
    EdgeSource {
        /// Zero-based channel index
        channel: usize,
        /// Reason reported by the edge source
        message: String,
    },

    /// The hardware counter page could not be mapped
    #[error("Failed to map counter from '{}': {source}", .path.display())]
    CounterMapping {
        /// Memory device that was opened
        path: PathBuf,
        /// Underlying open or mmap failure
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is semantically invalid
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration
        message: String,
    },

    /// The tracing subscriber could not be installed
    #[error("Failed to initialize tracing: {message}")]
    Logging {
        /// Error reported by tracing-subscriber
        message: String,
    },
}

impl IsovError {
    /// Check if this is the "no data" render condition.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }

    /// Check if this error came from the lifecycle shell's setup path.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::ChannelBusy { .. } | Self::EdgeSource { .. } | Self::CounterMapping { .. }
        )
    }
}

impl From<figment::Error> for IsovError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl From<IsovError> for std::io::Error {
    fn from(err: IsovError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            IsovError::NoData => ErrorKind::WouldBlock,
            IsovError::InvalidOperation => ErrorKind::Unsupported,
            IsovError::InvalidChannel { .. }
            | IsovError::InvalidConfig { .. }
            | IsovError::Config(_) => ErrorKind::InvalidInput,
            IsovError::ChannelBusy { .. }
            | IsovError::EdgeSource { .. }
            | IsovError::CounterMapping { .. }
            | IsovError::Logging { .. } => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
