//! Hardware-wallet emulator test harness.
//!
//! This library drives an external emulator process that simulates a secure
//! hardware wallet, exchanges commands with the application under test and
//! verifies that the device UI reaches the expected screens: a test author
//! expresses a UI walk as an action schedule or as "advance until this text
//! appears", and the captured screens are compared byte-for-byte against a
//! committed golden set.
//!
//! # Architecture
//!
//! - Each [`Session`] owns one emulator instance (pooled or ad-hoc), one
//!   command transport and one screen/event API client
//! - All waits are flat-interval polls under a deadline; a critical
//!   transport fault aborts a wait immediately instead of burning its bound
//! - An [`InstancePool`] amortizes instance launch cost across tests; a
//!   slot that cannot be reset is evicted, never reused
//!
//! # Quick Start
//!
//! ```no_run
//! use emudriver::{DeviceModel, Result, Session, StartOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut session = Session::builder()
//!         .app("./bin/app.elf")
//!         .start(StartOptions::new(DeviceModel::Nanos))
//!         .await?;
//!
//!     let base = std::path::Path::new(".");
//!     session.exchange(&[0xe0, 0x02, 0x00, 0x00, 0x00]).await?;
//!     session.compare_snapshots_and_approve(base, "sign_basic").await?;
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | Test-session orchestration: waits, navigation, flows |
//! | [`emulator`] | Instance lifecycle, pooling, device API, process runtime |
//! | [`device`] | Model catalog, actions, touch coordinate tables |
//! | [`transport`] | Command exchange and fault recording |
//! | [`snapshot`] | Screen captures and golden-set comparison |
//! | [`status`] | Status words and fault classification |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`rpc`] | Pass-through bridge for remote callers |

// ============================================================================
// Modules
// ============================================================================

/// Device models, input actions and touch coordinate tables.
pub mod device;

/// Emulator process management: launch, lifecycle, pooling, device API.
pub mod emulator;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Pass-through RPC bridge.
pub mod rpc;

/// Test-session orchestration.
pub mod session;

/// Screen snapshots and golden-set comparison.
pub mod snapshot;

/// Device protocol status words and fault classification.
pub mod status;

/// Command-exchange transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    DEFAULT_KEY_DELAY, DEFAULT_METHOD_TIMEOUT, DEFAULT_START_DELAY, DEFAULT_START_TIMEOUT,
    DEFAULT_WAIT_TIMEOUT, Session, SessionBuilder, StartOptions, TextSearchOptions,
};

// Device types
pub use device::{
    ButtonKind, ClickNavigation, DeviceModel, NavAction, ScreenRect, SwipeDirection, TouchButton,
    TouchNavigation, main_menu_navigation, schedule_to_actions, special_mode_navigation,
    toggle_expert_mode_navigation, touch_element,
};

// Emulator types
pub use emulator::{
    AppBundle, DeviceApi, EmulatorInstance, InstancePool, LaunchOptions, LaunchSpec,
    LifecycleState, LocalRuntime, PhysicalButton, PoolConfig, PoolStatus, PooledInstance,
    ProcessHandle, ProcessRuntime, UiEvent,
};

// Transport types
pub use transport::{ExchangeTransport, FaultRecorder, HttpTransport};

// Snapshot types
pub use snapshot::{Snapshot, compare_snapshot_dirs};

// Status types
pub use status::{ErrorClass, StatusClassifier};

// Error types
pub use error::{Error, Result, TransportFault};

// RPC bridge
pub use rpc::RpcBridge;
