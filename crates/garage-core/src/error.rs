//! Error types for garage-core.
//!
//! This module defines the errors produced while talking to the H5075 sensor
//! and while persisting readings.
//!
//! # Which errors reach the caller
//!
//! | Error | Where it stops |
//! |-------|----------------|
//! | [`Error::Timeout`] | Folded into the retry loop of a single acquisition |
//! | [`Error::Bluetooth`] | Folded into the retry loop of a single acquisition |
//! | [`Error::NoMeasurement`] | Folded into the retry loop of a single acquisition |
//! | [`Error::Exhausted`] | Returned to the scheduler or manual refresh caller |
//! | [`Error::LeaseBusy`] | Returned to the manual refresh caller |
//! | [`Error::LeaseFile`] | Returned to the scheduler or manual refresh caller |
//! | [`Error::Store`] | Returned from store calls; swallowed by the offline fallback |
//!
//! The update scheduler never lets any of these escape its loop.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while acquiring and recording sensor readings.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found on the adapter.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No Bluetooth adapter is available.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// Operation attempted while not connected to the device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required GATT characteristic is missing on the device.
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The sensor accepted the request but no measurement notification arrived.
    #[error("No measurement received")]
    NoMeasurement,

    /// Any other failure reported by the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every acquisition attempt failed.
    #[error("Acquisition from {address} failed after {attempts} attempts: {last}")]
    Exhausted {
        address: String,
        attempts: u32,
        /// The error recorded by the final attempt.
        #[source]
        last: Box<Error>,
    },

    /// The connection lease could not be obtained in time.
    #[error("Sensor connection is busy ({holder}), gave up after {waited:?}")]
    LeaseBusy { holder: String, waited: Duration },

    /// The lease lock file could not be opened or locked.
    #[error("Lease file {}: {source}", path.display())]
    LeaseFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse data received from the device.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Reading store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a transport error from any displayable cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error means the sensor could not be read this cycle.
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            Error::Exhausted { .. }
                | Error::Timeout { .. }
                | Error::NoMeasurement
                | Error::Bluetooth(_)
                | Error::Transport(_)
                | Error::NotConnected
                | Error::DeviceNotFound(_)
        )
    }

    /// The innermost error for an exhausted acquisition, otherwise `self`.
    pub fn root(&self) -> &Error {
        match self {
            Error::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<garage_types::ParseError> for Error {
    fn from(err: garage_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using garage-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
