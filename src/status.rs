//! Device protocol status words and fault classification.
//!
//! Every command exchanged with the emulated device ends with a two-byte
//! status word. Most non-success words describe transient conditions (busy,
//! locked, user still deciding) that a polling loop should simply wait out.
//! A small set describes conditions that will never self-resolve: sending
//! the same command again yields the same failure. The [`StatusClassifier`]
//! encodes that policy so waits can abort early instead of burning their
//! full timeout.
//!
//! # Example
//!
//! ```
//! use emudriver::status::{StatusClassifier, ErrorClass, words};
//!
//! let classifier = StatusClassifier::default();
//! assert_eq!(classifier.classify(words::INS_NOT_SUPPORTED), ErrorClass::Critical);
//! assert_eq!(classifier.classify(words::BUSY), ErrorClass::Recoverable);
//! ```

// ============================================================================
// Status Words
// ============================================================================

/// Well-known device status words.
pub mod words {
    /// Command completed successfully.
    pub const SUCCESS: u16 = 0x9000;
    /// Device is busy processing a previous command.
    pub const BUSY: u16 = 0x9001;
    /// Device is locked (PIN screen).
    pub const DEVICE_LOCKED: u16 = 0x5515;
    /// Execution error inside the application.
    pub const EXECUTION_ERROR: u16 = 0x6400;
    /// Empty input buffer.
    pub const EMPTY_BUFFER: u16 = 0x6982;
    /// Output buffer too small for the reply.
    pub const OUTPUT_BUFFER_TOO_SMALL: u16 = 0x6983;
    /// Invalid (reversibly blocked) data.
    pub const INVALID_DATA: u16 = 0x6984;
    /// Conditions of use not satisfied.
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    /// Command not allowed in the current state.
    pub const COMMAND_NOT_ALLOWED: u16 = 0x6986;
    /// Transaction context not initialized.
    pub const TX_NOT_INITIALIZED: u16 = 0x6987;
    /// Bad key handle.
    pub const BAD_KEY_HANDLE: u16 = 0x6a80;
    /// Instruction byte not supported.
    pub const INS_NOT_SUPPORTED: u16 = 0x6d00;
    /// Class byte not supported.
    pub const CLA_NOT_SUPPORTED: u16 = 0x6e00;
    /// Unknown error.
    pub const UNKNOWN_ERROR: u16 = 0x6f00;
    /// Signature verification failed.
    pub const SIGN_VERIFY_ERROR: u16 = 0x6f01;
    /// Invalid P1/P2 parameter bytes.
    pub const INVALID_P1P2: u16 = 0x6b00;
    /// Invalid command length.
    pub const INVALID_LENGTH: u16 = 0x6700;
    /// User cancelled the operation on the device.
    pub const USER_CANCELLED: u16 = 0x6501;
}

/// Returns a human-readable message for a status word.
#[must_use]
pub fn status_message(word: u16) -> &'static str {
    match word {
        words::SUCCESS => "Success",
        words::BUSY => "Device is busy",
        words::DEVICE_LOCKED => "Device is locked",
        words::EXECUTION_ERROR => "Execution error",
        words::EMPTY_BUFFER => "Empty buffer",
        words::OUTPUT_BUFFER_TOO_SMALL => "Output buffer too small",
        words::INVALID_DATA => "Invalid data",
        words::CONDITIONS_NOT_SATISFIED => "Conditions not satisfied",
        words::COMMAND_NOT_ALLOWED => "Command not allowed",
        words::TX_NOT_INITIALIZED => "Transaction not initialized",
        words::BAD_KEY_HANDLE => "Bad key handle",
        words::INS_NOT_SUPPORTED => "Instruction not supported",
        words::CLA_NOT_SUPPORTED => "Class not supported",
        words::UNKNOWN_ERROR => "Unknown error",
        words::SIGN_VERIFY_ERROR => "Signature verification error",
        words::INVALID_P1P2 => "Invalid parameters (P1/P2)",
        words::INVALID_LENGTH => "Invalid length",
        words::USER_CANCELLED => "User cancelled the operation",
        _ => "Unrecognized status word",
    }
}

// ============================================================================
// ErrorClass
// ============================================================================

/// Severity of a transport fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// May resolve on its own; polling loops keep waiting.
    Recoverable,
    /// Will never self-resolve; in-flight waits abort immediately.
    Critical,
}

impl ErrorClass {
    /// Returns `true` for [`ErrorClass::Critical`].
    #[inline]
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

// ============================================================================
// StatusClassifier
// ============================================================================

/// Status words that are critical by default.
///
/// Malformed input, unsupported instruction/class, signature failure, bad
/// key handle and invalid parameters: all of these indicate a command that
/// will fail identically on every retry.
const DEFAULT_CRITICAL: [u16; 7] = [
    words::EXECUTION_ERROR,
    words::INVALID_DATA,
    words::BAD_KEY_HANDLE,
    words::CLA_NOT_SUPPORTED,
    words::INS_NOT_SUPPORTED,
    words::INVALID_P1P2,
    words::SIGN_VERIFY_ERROR,
];

/// Policy table mapping status words to an [`ErrorClass`].
///
/// This is a table, not a protocol parser: words absent from the table
/// classify as [`ErrorClass::Recoverable`] so classification gaps never
/// starve a polling loop. The table can be extended per application without
/// touching any caller.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    critical: Vec<u16>,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self {
            critical: DEFAULT_CRITICAL.to_vec(),
        }
    }
}

impl StatusClassifier {
    /// Creates a classifier with the default critical table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier with an empty table (everything recoverable).
    #[inline]
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            critical: Vec::new(),
        }
    }

    /// Adds a status word to the critical table.
    #[must_use]
    pub fn with_critical(mut self, word: u16) -> Self {
        if !self.critical.contains(&word) {
            self.critical.push(word);
        }
        self
    }

    /// Classifies a status word.
    ///
    /// Pure and total: unknown words default to [`ErrorClass::Recoverable`].
    #[inline]
    #[must_use]
    pub fn classify(&self, word: u16) -> ErrorClass {
        if self.critical.contains(&word) {
            ErrorClass::Critical
        } else {
            ErrorClass::Recoverable
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_critical_words() {
        let c = StatusClassifier::default();
        for word in DEFAULT_CRITICAL {
            assert_eq!(c.classify(word), ErrorClass::Critical, "word {word:#06x}");
        }
    }

    #[test]
    fn test_benign_words_are_recoverable() {
        let c = StatusClassifier::default();
        assert_eq!(c.classify(words::SUCCESS), ErrorClass::Recoverable);
        assert_eq!(c.classify(words::BUSY), ErrorClass::Recoverable);
        assert_eq!(c.classify(words::DEVICE_LOCKED), ErrorClass::Recoverable);
        assert_eq!(c.classify(words::USER_CANCELLED), ErrorClass::Recoverable);
    }

    #[test]
    fn test_classify_is_pure() {
        let c = StatusClassifier::default();
        assert_eq!(
            c.classify(words::INVALID_DATA),
            c.classify(words::INVALID_DATA)
        );
        assert_eq!(c.classify(0x1234), c.classify(0x1234));
    }

    #[test]
    fn test_with_critical_extends_table() {
        let c = StatusClassifier::default().with_critical(words::DEVICE_LOCKED);
        assert_eq!(c.classify(words::DEVICE_LOCKED), ErrorClass::Critical);
        // The default entries are untouched.
        assert_eq!(c.classify(words::INVALID_P1P2), ErrorClass::Critical);
    }

    #[test]
    fn test_permissive_classifier() {
        let c = StatusClassifier::permissive();
        assert_eq!(c.classify(words::EXECUTION_ERROR), ErrorClass::Recoverable);
    }

    #[test]
    fn test_status_message_known_words() {
        assert_eq!(status_message(words::SUCCESS), "Success");
        assert_eq!(status_message(words::BAD_KEY_HANDLE), "Bad key handle");
    }

    proptest! {
        #[test]
        fn classify_is_total_and_fails_open(word: u16) {
            let c = StatusClassifier::default();
            let class = c.classify(word);
            if DEFAULT_CRITICAL.contains(&word) {
                prop_assert_eq!(class, ErrorClass::Critical);
            } else {
                prop_assert_eq!(class, ErrorClass::Recoverable);
            }
        }
    }
}
