//! Emulator process management: launch, lifecycle, pooling, device API.
//!
//! The [`instance::EmulatorInstance`] owns one emulator process; the
//! [`pool::InstancePool`] keeps warm instances per model; the
//! [`api::DeviceApi`] talks to a running instance's screen/event endpoints;
//! the [`runtime::ProcessRuntime`] capability isolates how processes are
//! actually started and stopped.

/// Screen/event API client.
pub mod api;

/// Application bundle and binary checks.
pub mod app;

/// Instance lifecycle.
pub mod instance;

/// Warm instance pool.
pub mod pool;

/// Process-runtime capability.
pub mod runtime;

/// Name prefix of every process this harness launches; stale-process
/// cleanup matches on it.
pub const INSTANCE_BASE_NAME: &str = "emudriver-";

/// Short random suffix for instance names.
pub(crate) fn short_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

pub use api::{DeviceApi, PhysicalButton, UiEvent};
pub use app::AppBundle;
pub use instance::{EmulatorInstance, LifecycleState};
pub use pool::{DEFAULT_HOST, InstancePool, PoolConfig, PoolStatus, PooledInstance, pool_ports};
pub use runtime::{
    DEFAULT_EMULATOR_PROGRAM, LaunchOptions, LaunchSpec, LocalRuntime, ProcessHandle,
    ProcessRuntime,
};
