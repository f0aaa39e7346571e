//! Process-runtime capability.
//!
//! Starting an emulator instance means launching an external process with a
//! composed command line and two published ports. The harness only needs a
//! narrow capability (start, stop, remove, enumerate by name prefix), so it
//! is expressed as the [`ProcessRuntime`] trait. [`LocalRuntime`] is the
//! default implementation and launches the emulator program directly as a
//! child process; a container-backed runtime can implement the same trait.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::device::DeviceModel;
use crate::error::{Error, Result};

use super::app::AppBundle;

// ============================================================================
// LaunchOptions
// ============================================================================

/// Free-form launch parameters shared by every instance of a session or
/// pool: SDK selection, extra emulator flags and log attachment.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// SDK version string passed to the emulator (empty = emulator default).
    pub sdk: String,
    /// Additional emulator command-line flags.
    pub custom_args: Vec<String>,
    /// Attach emulator output to the test run's stdio.
    pub logging: bool,
}

// ============================================================================
// LaunchSpec
// ============================================================================

/// Everything needed to launch one emulator instance.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Unique process name (also the registry key).
    pub name: String,
    /// Device model to emulate.
    pub model: DeviceModel,
    /// Application binary and auxiliary libraries.
    pub app: AppBundle,
    /// Port publishing the command-exchange endpoint.
    pub transport_port: u16,
    /// Port publishing the screen/event API.
    pub api_port: u16,
    /// Free-form launch parameters.
    pub options: LaunchOptions,
}

impl LaunchSpec {
    /// Composes the emulator command line.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--log-level".to_string(),
            "speculos:DEBUG".to_string(),
            "--color".to_string(),
            "JADE_GREEN".to_string(),
            "--display".to_string(),
            "headless".to_string(),
            "--model".to_string(),
            self.model.as_str().to_string(),
            "--api-port".to_string(),
            self.api_port.to_string(),
            "--apdu-port".to_string(),
            self.transport_port.to_string(),
        ];

        if !self.options.sdk.is_empty() {
            args.push("--sdk".to_string());
            args.push(self.options.sdk.clone());
        }

        args.extend(self.options.custom_args.iter().cloned());

        for (lib_name, lib_path) in &self.app.libraries {
            args.push("-l".to_string());
            args.push(format!("{lib_name}:{}", lib_path.display()));
        }

        args.push(self.app.path.display().to_string());
        args
    }
}

// ============================================================================
// ProcessHandle
// ============================================================================

/// Handle to a started emulator process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Process name (the launch spec's name).
    pub id: String,
    /// OS process id, when known.
    pub pid: Option<u32>,
}

// ============================================================================
// ProcessRuntime
// ============================================================================

/// Capability for starting and stopping emulator processes.
#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    /// Starts a process described by `spec`.
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle>;

    /// Requests termination with the given grace period, then waits for the
    /// process to exit. A handle that is already gone is a no-op.
    async fn stop(&self, handle: &ProcessHandle, grace: Duration) -> Result<()>;

    /// Forcibly removes any remaining process state for the handle.
    async fn remove(&self, handle: &ProcessHandle) -> Result<()>;

    /// Lists handles whose name starts with `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ProcessHandle>>;
}

// ============================================================================
// LocalRuntime
// ============================================================================

/// Default path of the emulator launcher program.
pub const DEFAULT_EMULATOR_PROGRAM: &str = "speculos";

/// Runs emulator instances as local child processes.
///
/// Children are spawned kill-on-drop, so even an abandoned runtime cannot
/// leak processes past its own lifetime.
pub struct LocalRuntime {
    program: PathBuf,
    children: Mutex<FxHashMap<String, Child>>,
}

impl LocalRuntime {
    /// Creates a runtime launching the default emulator program.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(DEFAULT_EMULATOR_PROGRAM)
    }

    /// Creates a runtime launching a specific emulator program.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            children: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the number of tracked child processes.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRuntime for LocalRuntime {
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&self.program);
        cmd.args(spec.to_args());
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        if spec.options.logging {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::launch(&spec.name, e.to_string()))?;
        let pid = child.id();
        info!(name = %spec.name, pid, model = %spec.model, "Emulator process spawned");

        self.children.lock().insert(spec.name.clone(), child);
        Ok(ProcessHandle {
            id: spec.name.clone(),
            pid,
        })
    }

    async fn stop(&self, handle: &ProcessHandle, _grace: Duration) -> Result<()> {
        let child = self.children.lock().remove(&handle.id);
        let Some(mut child) = child else {
            debug!(name = %handle.id, "Stop on unknown process is a no-op");
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            // Surface the failure: a leaked process silently exhausts the
            // pool's port ranges.
            return Err(Error::launch(
                &handle.id,
                format!("failed to stop process: {e}"),
            ));
        }
        child
            .wait()
            .await
            .map_err(|e| Error::launch(&handle.id, format!("failed to reap process: {e}")))?;
        info!(name = %handle.id, "Emulator process stopped");
        Ok(())
    }

    async fn remove(&self, handle: &ProcessHandle) -> Result<()> {
        let child = self.children.lock().remove(&handle.id);
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!(name = %handle.id, error = %e, "Kill during remove failed");
            }
            let _ = child.wait().await;
        }
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ProcessHandle>> {
        let children = self.children.lock();
        Ok(children
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, child)| ProcessHandle {
                id: name.clone(),
                pid: child.id(),
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
