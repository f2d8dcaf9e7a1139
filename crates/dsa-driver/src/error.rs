//! Error types for DSA work-queue operations

use dsa_hw::CompletionStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for DSA operations
pub type Result<T> = std::result::Result<T, DsaError>;

/// Errors that can occur while submitting work to the accelerator
///
/// Recoverable page faults never appear here: the client resumes them
/// internally and only reports them through
/// [`TransferReport`](crate::TransferReport).
#[derive(Debug, Error)]
pub enum DsaError {
    /// No enabled user-mode shared work queue was found
    #[error("No usable DSA work queue (need type=user, mode=shared, enabled)")]
    NoDeviceAvailable,

    /// Work-queue device file missing
    #[error("Work queue device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Mapping the submission portal (or a buffer) failed
    #[error("Mapping failed: {reason}")]
    MappingFailed {
        /// Reason for failure
        reason: String,
    },

    /// Every enqueue attempt was rejected by the queue
    #[error("Work queue saturated: {attempts} enqueue attempts rejected")]
    QueueSaturated {
        /// Number of attempts made
        attempts: u32,
    },

    /// The completion record stayed pending for the whole poll budget
    #[error("Completion timeout after {polls} polls")]
    CompletionTimeout {
        /// Number of polls performed
        polls: u32,
    },

    /// The accelerator reported a non-recoverable status
    #[error("Operation failed with status {status} after {bytes_completed} bytes")]
    OperationFailed {
        /// Status byte written by the device
        status: CompletionStatus,
        /// Bytes completed before the failure
        bytes_completed: u32,
    },

    /// Page-fault resumption did not converge
    #[error("Gave up after {resumptions} page-fault resumptions ({remaining} bytes left)")]
    ResumeLimitExceeded {
        /// Resumptions performed
        resumptions: u32,
        /// Bytes still outstanding
        remaining: u32,
    },

    /// Destination content differs from the requested effect
    #[error("Content mismatch at offset {offset}: expected {expected:#04x}, found {found:#04x}")]
    ContentMismatch {
        /// First differing byte
        offset: usize,
        /// Expected byte
        expected: u8,
        /// Byte found in the destination
        found: u8,
    },

    /// Descriptor could not be built or resumed
    #[error("Invalid descriptor: {reason}")]
    InvalidDescriptor {
        /// Reason for failure
        reason: String,
    },

    /// Calibration produced unusable timing
    #[error("Invalid calibration: {reason}")]
    InvalidCalibration {
        /// Reason for failure
        reason: String,
    },

    /// Operation not available on this host
    #[error("Unsupported: {reason}")]
    Unsupported {
        /// Reason for failure
        reason: String,
    },

    /// I/O error during discovery or device access
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl DsaError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a mapping failed error
    pub fn mapping_failed(reason: impl Into<String>) -> Self {
        Self::MappingFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    /// Create an invalid calibration error
    pub fn invalid_calibration(reason: impl Into<String>) -> Self {
        Self::InvalidCalibration {
            reason: reason.into(),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }
}
