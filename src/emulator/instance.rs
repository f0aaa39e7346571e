//! Emulator instance lifecycle.
//!
//! An [`EmulatorInstance`] owns one emulator process: its name, model, the
//! two published ports and the process handle. It must reach
//! [`LifecycleState::Running`] and answer its screen-capture endpoint before
//! any synchronization or navigation operation touches it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::device::DeviceModel;
use crate::error::Result;

use super::app::AppBundle;
use super::runtime::{LaunchOptions, LaunchSpec, ProcessHandle, ProcessRuntime};

// ============================================================================
// LifecycleState
// ============================================================================

/// Lifecycle of an emulator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, process not yet started.
    Created,
    /// Process started and owning its ports.
    Running,
    /// Process stopped and removed.
    Stopped,
}

// ============================================================================
// EmulatorInstance
// ============================================================================

/// One emulator process with its identity and endpoints.
///
/// Exclusively owned by whichever component currently holds it: a pool slot
/// or a session, never both.
pub struct EmulatorInstance {
    name: String,
    model: DeviceModel,
    transport_port: u16,
    api_port: u16,
    runtime: Arc<dyn ProcessRuntime>,
    handle: Option<ProcessHandle>,
    state: LifecycleState,
}

impl fmt::Debug for EmulatorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorInstance")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("transport_port", &self.transport_port)
            .field("api_port", &self.api_port)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EmulatorInstance - Constructor & Accessors
// ============================================================================

impl EmulatorInstance {
    /// Creates an instance bound to the given name and ports, in
    /// [`LifecycleState::Created`].
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        model: DeviceModel,
        transport_port: u16,
        api_port: u16,
        runtime: Arc<dyn ProcessRuntime>,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            transport_port,
            api_port,
            runtime,
            handle: None,
            state: LifecycleState::Created,
        }
    }

    /// Returns the instance name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the emulated model.
    #[inline]
    #[must_use]
    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// Returns the command-exchange port.
    #[inline]
    #[must_use]
    pub fn transport_port(&self) -> u16 {
        self.transport_port
    }

    /// Returns the screen/event API port.
    #[inline]
    #[must_use]
    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }
}

// ============================================================================
// EmulatorInstance - Lifecycle
// ============================================================================

impl EmulatorInstance {
    /// Starts the emulator process with the given application and launch
    /// parameters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AppNotFound`] when a bundle binary is
    /// missing, or [`crate::Error::Launch`] when the process fails to start.
    pub async fn start(&mut self, app: &AppBundle, options: &LaunchOptions) -> Result<()> {
        app.validate()?;

        let spec = LaunchSpec {
            name: self.name.clone(),
            model: self.model,
            app: app.clone(),
            transport_port: self.transport_port,
            api_port: self.api_port,
            options: options.clone(),
        };

        debug!(name = %self.name, model = %self.model, "Starting emulator instance");
        let handle = self.runtime.start(&spec).await?;
        self.handle = Some(handle);
        self.state = LifecycleState::Running;
        info!(
            name = %self.name,
            transport_port = self.transport_port,
            api_port = self.api_port,
            "Emulator instance running"
        );
        Ok(())
    }

    /// Stops the process with zero grace and removes it.
    ///
    /// Safe to call on an already-stopped instance. A failing stop is
    /// surfaced, not swallowed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Launch`] when stop or remove fail.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            debug!(name = %self.name, "Stop on non-running instance is a no-op");
            return Ok(());
        };

        debug!(name = %self.name, "Stopping emulator instance");
        self.runtime.stop(&handle, Duration::ZERO).await?;
        self.runtime.remove(&handle).await?;
        self.state = LifecycleState::Stopped;
        info!(name = %self.name, "Emulator instance stopped");
        Ok(())
    }

    /// Stops the process and starts it again on the same name and ports
    /// with a new application payload.
    ///
    /// # Errors
    ///
    /// Propagates stop and start failures.
    pub async fn restart_with(&mut self, app: &AppBundle, options: &LaunchOptions) -> Result<()> {
        self.stop().await?;
        self.start(app, options).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// Runtime that records calls without touching the OS.
    #[derive(Default)]
    struct FakeRuntime {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ProcessRuntime for FakeRuntime {
        async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessHandle {
                id: spec.name.clone(),
                pid: Some(1),
            })
        }

        async fn stop(&self, _handle: &ProcessHandle, _grace: Duration) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn remove(&self, _handle: &ProcessHandle) -> Result<()> {
            Ok(())
        }

        async fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<ProcessHandle>> {
            Ok(Vec::new())
        }
    }

    fn temp_app() -> (tempfile::NamedTempFile, AppBundle) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"stub").unwrap();
        let bundle = AppBundle::new(file.path());
        (file, bundle)
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let runtime = Arc::new(FakeRuntime::default());
        let (_file, app) = temp_app();
        let mut instance =
            EmulatorInstance::new("emudriver-a", DeviceModel::Nanos, 9998, 5000, runtime.clone());
        assert_eq!(instance.state(), LifecycleState::Created);

        instance.start(&app, &LaunchOptions::default()).await.unwrap();
        assert_eq!(instance.state(), LifecycleState::Running);
        assert_eq!(runtime.starts.load(Ordering::SeqCst), 1);

        instance.stop().await.unwrap();
        assert_eq!(instance.state(), LifecycleState::Stopped);
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let runtime = Arc::new(FakeRuntime::default());
        let (_file, app) = temp_app();
        let mut instance =
            EmulatorInstance::new("emudriver-b", DeviceModel::Nanox, 9998, 5000, runtime.clone());
        instance.start(&app, &LaunchOptions::default()).await.unwrap();
        instance.stop().await.unwrap();
        instance.stop().await.unwrap();
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_app() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut instance =
            EmulatorInstance::new("emudriver-c", DeviceModel::Stax, 9998, 5000, runtime.clone());
        let app = AppBundle::new("/nonexistent/app.elf");
        assert!(
            instance
                .start(&app, &LaunchOptions::default())
                .await
                .is_err()
        );
        assert_eq!(runtime.starts.load(Ordering::SeqCst), 0);
        assert_eq!(instance.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn test_restart_with_swaps_payload() {
        let runtime = Arc::new(FakeRuntime::default());
        let (_f1, app1) = temp_app();
        let (_f2, app2) = temp_app();
        let mut instance =
            EmulatorInstance::new("emudriver-d", DeviceModel::Flex, 9998, 5000, runtime.clone());
        instance.start(&app1, &LaunchOptions::default()).await.unwrap();
        instance
            .restart_with(&app2, &LaunchOptions::default())
            .await
            .unwrap();
        assert_eq!(instance.state(), LifecycleState::Running);
        assert_eq!(runtime.starts.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
    }
}
