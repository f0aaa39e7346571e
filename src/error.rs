//! Error types for the emulator test harness.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use emudriver::{Result, Session};
//!
//! async fn example(session: &mut Session) -> Result<()> {
//!     session.click_right("", true, false).await?;
//!     session.wait_for_text("APPROVE", None, false).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::AppNotFound`] |
//! | Lifecycle | [`Error::Launch`], [`Error::Reset`] |
//! | Protocol | [`Error::Transport`] |
//! | Waits | [`Error::Timeout`] |
//! | Comparison | [`Error::SnapshotMismatch`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`], [`Error::Image`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::status::{ErrorClass, status_message};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// TransportFault
// ============================================================================

/// A recorded protocol-level fault.
///
/// Carries the device status word, a human-readable message and the
/// [`ErrorClass`] assigned by the session's classifier. Cloneable so the
/// fault recorder can hand copies to polling loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    /// The device status word that produced the fault.
    pub status: u16,
    /// Human-readable description of the status word.
    pub message: String,
    /// Severity assigned at classification time.
    pub class: ErrorClass,
}

impl TransportFault {
    /// Creates a fault for a status word with a pre-assigned class.
    #[must_use]
    pub fn new(status: u16, class: ErrorClass) -> Self {
        Self {
            status,
            message: status_message(status).to_string(),
            class,
        }
    }

    /// Returns `true` if this fault should abort in-flight waits.
    #[inline]
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.class.is_critical()
    }
}

impl From<TransportFault> for Error {
    fn from(fault: TransportFault) -> Self {
        Self::Transport {
            status: fault.status,
            message: fault.message,
            class: fault.class,
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging; waits and
/// comparisons name what was awaited or which index diverged.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session or pool configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Application binary not found at path.
    #[error("Application binary not found at: {path} (did you compile?)")]
    AppNotFound {
        /// Path where the binary was expected.
        path: PathBuf,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Failed to launch an emulator instance.
    #[error("Failed to launch emulator instance {name}: {message}")]
    Launch {
        /// Name of the instance that failed to launch.
        name: String,
        /// Description of the launch failure.
        message: String,
    },

    /// A pooled instance could not be restored to a clean state.
    ///
    /// The pool evicts the slot rather than returning it.
    #[error("Failed to reset instance {name}: {message}")]
    Reset {
        /// Name of the instance that failed to reset.
        name: String,
        /// Description of the reset failure.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The device replied with a non-success status word.
    #[error("Transport fault {status:#06x}: {message}")]
    Transport {
        /// The device status word.
        status: u16,
        /// Human-readable description of the status word.
        message: String,
        /// Severity assigned at classification time.
        class: ErrorClass,
    },

    /// Protocol violation or malformed device reply.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Wait Errors
    // ========================================================================
    /// A wait exceeded its bound.
    ///
    /// Names the screen/text that was awaited and the bound that elapsed.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the awaited condition.
        operation: String,
        /// Milliseconds waited before timing out.
        timeout_ms: u64,
    },

    // ========================================================================
    // Comparison Errors
    // ========================================================================
    /// A candidate snapshot diverged from its golden reference.
    #[error("Snapshot [{index:05}] does not match: {message}")]
    SnapshotMismatch {
        /// Zero-based index of the first diverging image.
        index: usize,
        /// What went wrong at that index.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an application-not-found error.
    #[inline]
    pub fn app_not_found(path: impl Into<PathBuf>) -> Self {
        Self::AppNotFound { path: path.into() }
    }

    /// Creates a launch error.
    #[inline]
    pub fn launch(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a reset error.
    #[inline]
    pub fn reset(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reset {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a transport fault error for a status word.
    #[inline]
    pub fn transport(status: u16, class: ErrorClass) -> Self {
        Self::Transport {
            status,
            message: status_message(status).to_string(),
            class,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a snapshot mismatch error.
    #[inline]
    pub fn snapshot_mismatch(index: usize, message: impl Into<String>) -> Self {
        Self::SnapshotMismatch {
            index,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a critical transport fault.
    ///
    /// Critical faults abort in-flight waits instead of exhausting their
    /// timeout.
    #[inline]
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                class: ErrorClass::Critical,
                ..
            }
        )
    }

    /// Returns `true` if this is a comparison failure.
    #[inline]
    #[must_use]
    pub fn is_comparison(&self) -> bool {
        matches!(self, Self::SnapshotMismatch { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    use crate::status::words;

    #[test]
    fn test_error_display() {
        let err = Error::launch("emudriver-abc", "port already bound");
        assert_eq!(
            err.to_string(),
            "Failed to launch emulator instance emudriver-abc: port already bound"
        );
    }

    #[test]
    fn test_timeout_display_names_operation() {
        let err = Error::timeout("screen to change", 5000);
        assert_eq!(err.to_string(), "Timeout after 5000ms: screen to change");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_transport_display_carries_status() {
        let err = Error::transport(words::BAD_KEY_HANDLE, ErrorClass::Critical);
        assert_eq!(err.to_string(), "Transport fault 0x6a80: Bad key handle");
        assert!(err.is_critical());
    }

    #[test]
    fn test_recoverable_transport_is_not_critical() {
        let err = Error::transport(words::BUSY, ErrorClass::Recoverable);
        assert!(!err.is_critical());
    }

    #[test]
    fn test_snapshot_mismatch_names_index() {
        let err = Error::snapshot_mismatch(7, "images do not match");
        assert_eq!(
            err.to_string(),
            "Snapshot [00007] does not match: images do not match"
        );
        assert!(err.is_comparison());
    }

    #[test]
    fn test_fault_round_trip() {
        let fault = TransportFault::new(words::INVALID_DATA, ErrorClass::Critical);
        assert!(fault.is_critical());
        let err: Error = fault.into();
        assert!(err.is_critical());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
