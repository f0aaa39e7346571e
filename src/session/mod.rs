//! Test-session orchestration.
//!
//! A [`Session`] owns one emulator instance for the duration of a test:
//! it acquires the instance (pooled or ad-hoc), connects the command
//! transport, waits for the application's start screen, exposes the
//! synchronization and navigation operations, and releases everything on
//! close.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Fixed delay between polls and the minimum settle delay after an input
/// action. These are bounded-latency waits against a local process, so the
/// interval is flat, not exponential.
pub const DEFAULT_KEY_DELAY: Duration = Duration::from_millis(250);

/// How long the transport endpoint may take to accept connections.
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(20);

/// How long the application may take to show its start text.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for navigation-level waits.
pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound for screen/event waits.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(45);

// ============================================================================
// Modules
// ============================================================================

/// Session lifecycle and orchestration.
mod core;

/// Navigation state machine and golden-set flows.
mod navigate;

/// Start options.
mod options;

/// Polling synchronization primitives.
mod sync;

pub use self::core::{Session, SessionBuilder};
pub use navigate::TextSearchOptions;
pub use options::StartOptions;
