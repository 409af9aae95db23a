//! Error types for GridSense
//!
//! Only acquisition and configuration can fail. Measurements that cannot be
//! made (too few pulses, out-of-band frequency, non-finite samples) are not
//! errors: estimators and the stability analyzer return `None` instead.

use thiserror::Error;

/// Result type alias for GridSense operations
pub type Result<T> = std::result::Result<T, GridSenseError>;

/// Main error type for GridSense operations
#[derive(Error, Debug)]
pub enum GridSenseError {
    /// GPIO device missing or not accessible; the caller should run degraded
    #[error("Hardware unavailable: {reason}")]
    HardwareUnavailable { reason: String },

    /// Building or rebuilding the line request failed
    #[error("Hardware request failed: {0}")]
    Hardware(String),

    /// Transient failure while waiting for or reading edge events
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel was never registered
    #[error("Channel not found: {0}")]
    ChannelNotFound(u32),

    /// Wiring supports a fixed number of concurrent channels
    #[error("Maximum channels ({max}) reached")]
    MaxChannelsReached { max: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GridSenseError {
    /// Shorthand for [`GridSenseError::HardwareUnavailable`]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::HardwareUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the error means the hardware is absent rather than misbehaving
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::HardwareUnavailable { .. })
    }
}
