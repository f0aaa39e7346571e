//! Session start options.
//!
//! A [`StartOptions`] value is built once, resolved against the device
//! model's defaults when the session starts, and never mutated afterwards;
//! different configuration means a different session.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::device::{ButtonKind, DeviceModel};
use crate::emulator::LaunchOptions;

use super::{DEFAULT_START_DELAY, DEFAULT_START_TIMEOUT};

// ============================================================================
// StartOptions
// ============================================================================

/// Immutable per-session configuration.
///
/// Empty text fields resolve to the model's defaults at session start.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Device model under test.
    pub model: DeviceModel,

    /// Attach emulator output to the test run's stdio.
    pub logging: bool,

    /// How long the transport endpoint may take to accept connections.
    pub start_delay: Duration,

    /// How long the application may take to show its start text.
    pub start_timeout: Duration,

    /// Additional emulator command-line flags.
    pub custom_args: Vec<String>,

    /// SDK version string passed to the emulator (empty = emulator default).
    pub sdk: String,

    /// Text that marks the booted application's main screen
    /// (empty = model default).
    pub start_text: String,

    /// Match the start text case-sensitively.
    pub case_sensitive: bool,

    /// Which control confirms an approval on touch devices.
    pub approve_action: ButtonKind,

    /// Text that locates the approval screen (empty = model default).
    pub approve_keyword: String,

    /// Text that locates the rejection screen (empty = model default).
    pub reject_keyword: String,

    /// The flow under test is a blind-signing variant; on touch devices the
    /// first advance of a text search becomes a reject tap.
    pub blind_signing: bool,
}

// ============================================================================
// Constructors
// ============================================================================

impl StartOptions {
    /// Creates default options for a model.
    #[must_use]
    pub fn new(model: DeviceModel) -> Self {
        Self {
            model,
            logging: false,
            start_delay: DEFAULT_START_DELAY,
            start_timeout: DEFAULT_START_TIMEOUT,
            custom_args: Vec::new(),
            sdk: String::new(),
            start_text: String::new(),
            case_sensitive: false,
            approve_action: ButtonKind::ApproveHoldButton,
            approve_keyword: String::new(),
            reject_keyword: String::new(),
            blind_signing: false,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl StartOptions {
    /// Enables emulator log attachment.
    #[inline]
    #[must_use]
    pub fn with_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Sets the transport connect bound.
    #[inline]
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Sets the start-text wait bound.
    #[inline]
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Adds an emulator command-line flag.
    #[inline]
    #[must_use]
    pub fn with_custom_arg(mut self, arg: impl Into<String>) -> Self {
        self.custom_args.push(arg.into());
        self
    }

    /// Sets the SDK version string.
    #[inline]
    #[must_use]
    pub fn with_sdk(mut self, sdk: impl Into<String>) -> Self {
        self.sdk = sdk.into();
        self
    }

    /// Overrides the start text.
    #[inline]
    #[must_use]
    pub fn with_start_text(mut self, text: impl Into<String>) -> Self {
        self.start_text = text.into();
        self
    }

    /// Matches the start text case-sensitively.
    #[inline]
    #[must_use]
    pub fn with_case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// Sets the approval control used on touch devices.
    #[inline]
    #[must_use]
    pub fn with_approve_action(mut self, action: ButtonKind) -> Self {
        self.approve_action = action;
        self
    }

    /// Overrides the approval keyword.
    #[inline]
    #[must_use]
    pub fn with_approve_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.approve_keyword = keyword.into();
        self
    }

    /// Overrides the rejection keyword.
    #[inline]
    #[must_use]
    pub fn with_reject_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.reject_keyword = keyword.into();
        self
    }

    /// Marks the flow as a blind-signing variant.
    #[inline]
    #[must_use]
    pub fn with_blind_signing(mut self) -> Self {
        self.blind_signing = true;
        self
    }
}

// ============================================================================
// Resolution
// ============================================================================

impl StartOptions {
    /// Fills empty text fields with the model's defaults.
    pub(crate) fn resolve_defaults(&mut self) {
        if self.start_text.is_empty() {
            self.start_text = self.model.default_start_text().to_string();
        }
        if self.approve_keyword.is_empty() {
            self.approve_keyword = self.model.default_approve_keyword().to_string();
        }
        if self.reject_keyword.is_empty() {
            self.reject_keyword = self.model.default_reject_keyword().to_string();
        }
    }

    /// Returns the launch parameters derived from these options.
    pub(crate) fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            sdk: self.sdk.clone(),
            custom_args: self.custom_args.clone(),
            logging: self.logging,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_per_model() {
        let mut nano = StartOptions::new(DeviceModel::Nanos);
        nano.resolve_defaults();
        assert_eq!(nano.start_text, "Ready");
        assert_eq!(nano.approve_keyword, "APPROVE");
        assert_eq!(nano.reject_keyword, "REJECT");

        let mut stax = StartOptions::new(DeviceModel::Stax);
        stax.resolve_defaults();
        assert_eq!(stax.approve_keyword, "Hold to sign");
        assert_eq!(stax.reject_keyword, "Cancel");
    }

    #[test]
    fn test_explicit_text_is_kept() {
        let mut options = StartOptions::new(DeviceModel::Nanox).with_start_text("MyApp");
        options.resolve_defaults();
        assert_eq!(options.start_text, "MyApp");
    }

    #[test]
    fn test_builder_chain() {
        let options = StartOptions::new(DeviceModel::Flex)
            .with_logging()
            .with_sdk("2.3")
            .with_custom_arg("--seed")
            .with_blind_signing()
            .with_approve_action(ButtonKind::ApproveTapButton);
        assert!(options.logging);
        assert!(options.blind_signing);
        assert_eq!(options.approve_action, ButtonKind::ApproveTapButton);

        let launch = options.launch_options();
        assert_eq!(launch.sdk, "2.3");
        assert_eq!(launch.custom_args, vec!["--seed".to_string()]);
        assert!(launch.logging);
    }
}
