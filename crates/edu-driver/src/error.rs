//! Error types for edu driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for edu operations
pub type Result<T> = std::result::Result<T, EduError>;

/// Errors that can occur during edu operations
#[derive(Debug, Error)]
pub enum EduError {
    /// Device not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// No edu devices detected on the system
    #[error("No edu devices detected")]
    NoDevicesFound,

    /// Device index out of range
    #[error("Device index {index} out of range (have {count} devices)")]
    InvalidIndex {
        /// Requested index
        index: usize,
        /// Number of available devices
        count: usize,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Register window could not be mapped. Fatal — the device is unusable
    /// and the fault is never retried.
    #[error("Register window mapping failed: {reason}")]
    MappingFault {
        /// Reason for failure
        reason: String,
    },

    /// A single register read or write failed at the transport level.
    /// Surfaced to the caller, never retried automatically.
    #[error("Register transfer failed: {reason}")]
    TransferFault {
        /// Reason for failure
        reason: String,
    },

    /// A blocking wait for device completion was cancelled from outside.
    /// The device may be left mid-computation.
    #[error("Wait for device completion was interrupted")]
    InterruptedWait,

    /// Caller issued an operation outside the documented set, or issued a
    /// command while another was still in flight. Surfaced before any
    /// device access.
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Reason for rejection
        reason: String,
    },
}

impl EduError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a mapping fault
    pub fn mapping_fault(reason: impl Into<String>) -> Self {
        Self::MappingFault {
            reason: reason.into(),
        }
    }

    /// Create a transfer fault
    pub fn transfer_fault(reason: impl Into<String>) -> Self {
        Self::TransferFault {
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}
