//! Session lifecycle and orchestration.
//!
//! One [`Session`] owns one emulator instance for the duration of a test:
//! acquired from an [`InstancePool`] when one is attached and has a free
//! slot, created ad-hoc otherwise. Closing the session gives the instance
//! back (pooled) or stops it (owned); the close path always runs, even when
//! the start sequence itself fails midway.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::device::DeviceModel;
use crate::emulator::{
    AppBundle, DeviceApi, EmulatorInstance, INSTANCE_BASE_NAME, InstancePool, LocalRuntime,
    PooledInstance, ProcessRuntime, UiEvent,
};
use crate::error::{Error, Result};
use crate::rpc::RpcBridge;
use crate::snapshot::{Snapshot, save_snapshot};
use crate::status::StatusClassifier;
use crate::transport::{ExchangeTransport, FaultRecorder, HttpTransport};

use super::StartOptions;
use super::sync::poll_until;

// ============================================================================
// InstanceHolder
// ============================================================================

/// How the session holds its instance.
enum InstanceHolder {
    /// Created ad-hoc; stopped on close.
    Owned(EmulatorInstance),
    /// Leased from a pool; released on close.
    Pooled {
        pool: Arc<InstancePool>,
        leased: PooledInstance,
    },
    /// Already given back.
    Released,
}

// ============================================================================
// Session
// ============================================================================

/// One test session against one emulator instance.
///
/// Operations are strictly sequential: the caller awaits each step before
/// issuing the next, so a screenshot is never captured concurrently with an
/// in-flight input action on the same instance.
pub struct Session {
    pub(crate) options: StartOptions,
    host: String,
    name: String,
    transport_port: u16,
    api_port: u16,
    api: DeviceApi,
    faults: Arc<FaultRecorder>,
    holder: InstanceHolder,
    pub(crate) main_menu: Snapshot,
    pub(crate) initial_events: Vec<UiEvent>,
    rpc: Option<RpcBridge>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("model", &self.options.model)
            .field("transport_port", &self.transport_port)
            .field("api_port", &self.api_port)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction
// ============================================================================

impl Session {
    /// Creates a configuration builder for a session.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the instance name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device model under test.
    #[inline]
    #[must_use]
    pub fn model(&self) -> DeviceModel {
        self.options.model
    }

    /// Returns the resolved start options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &StartOptions {
        &self.options
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

    /// Returns the main-menu snapshot captured at session start.
    #[inline]
    #[must_use]
    pub fn main_menu_snapshot(&self) -> &Snapshot {
        &self.main_menu
    }

    /// Returns the event log captured at session start.
    #[inline]
    #[must_use]
    pub fn initial_events(&self) -> &[UiEvent] {
        &self.initial_events
    }

    /// Returns the fault-recording transport for raw command exchange.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> Arc<FaultRecorder> {
        Arc::clone(&self.faults)
    }

    pub(crate) fn device_api(&self) -> &DeviceApi {
        &self.api
    }

    pub(crate) fn fault_recorder(&self) -> &FaultRecorder {
        &self.faults
    }
}

// ============================================================================
// Session - Device Operations
// ============================================================================

impl Session {
    /// Exchanges one command with the device application.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on non-success status words (also
    /// recorded for the synchronization engine) or the underlying I/O error.
    pub async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>> {
        self.faults.exchange(command).await
    }

    /// Captures the current screen, optionally writing it to `filename`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the capture endpoint is unreachable or
    /// [`Error::Io`] when the file cannot be written.
    pub async fn snapshot(&self, filename: Option<&Path>) -> Result<Snapshot> {
        let data = self.api.screenshot().await?;
        if let Some(path) = filename {
            save_snapshot(&data, path)?;
        }
        let screen = self.options.model.screen();
        Ok(Snapshot::new(screen.width, screen.height, data))
    }

    /// Returns the current-screen event log (empty when unreachable).
    pub async fn events(&self) -> Vec<UiEvent> {
        self.api.events().await
    }

    /// Clears the on-device event log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the endpoint is unreachable.
    pub async fn delete_events(&self) -> Result<()> {
        self.api.delete_events().await
    }

    /// Logs the current event log at debug level.
    pub async fn dump_events(&self) {
        for event in self.events().await {
            debug!(?event, "Device event");
        }
    }
}

// ============================================================================
// Session - RPC Bridge
// ============================================================================

impl Session {
    /// Starts the pass-through RPC bridge forwarding remote `exchange`
    /// calls to this session's transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the bridge address cannot be bound.
    pub async fn start_rpc_bridge(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let bridge = RpcBridge::serve(addr, self.transport()).await?;
        let bound = bridge.addr();
        self.rpc = Some(bridge);
        Ok(bound)
    }

    /// Stops the RPC bridge if one is running.
    pub fn stop_rpc_bridge(&mut self) {
        if let Some(bridge) = self.rpc.take() {
            bridge.shutdown();
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Releases the instance: back to its pool, or stopped when owned.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] when stopping an owned instance fails; the
    /// leak is then bounded to that failed stop.
    pub async fn close(&mut self) -> Result<()> {
        debug!(name = %self.name, "Close");
        self.stop_rpc_bridge();
        match std::mem::replace(&mut self.holder, InstanceHolder::Released) {
            InstanceHolder::Owned(mut instance) => instance.stop().await?,
            InstanceHolder::Pooled { pool, leased } => pool.release(leased).await,
            InstanceHolder::Released => {}
        }
        Ok(())
    }

    async fn finish_start(&mut self) -> Result<()> {
        self.connect().await?;

        debug!(start_text = %self.options.start_text, "Wait for start text");
        let start_text = self.options.start_text.clone();
        self.wait_for_text(
            &start_text,
            Some(self.options.start_timeout),
            self.options.case_sensitive,
        )
        .await?;

        debug!("Capture initial snapshot and events");
        self.main_menu = self.snapshot(None).await?;
        self.initial_events = self.events().await;
        Ok(())
    }

    /// Polls until the transport endpoint accepts connections.
    async fn connect(&self) -> Result<()> {
        let host = self.host.clone();
        let port = self.transport_port;
        debug!(port, "Connecting to transport");
        poll_until(
            "transport endpoint to accept connections",
            self.options.start_delay,
            &self.faults,
            move || {
                let host = host.clone();
                async move {
                    tokio::net::TcpStream::connect((host.as_str(), port))
                        .await
                        .is_ok()
                }
            },
        )
        .await
    }
}

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring and starting a [`Session`].
///
/// # Example
///
/// ```no_run
/// use emudriver::{DeviceModel, Session, StartOptions};
///
/// # async fn example() -> emudriver::Result<()> {
/// let mut session = Session::builder()
///     .app("./bin/app.elf")
///     .library("lib", "./bin/lib.elf")
///     .start(StartOptions::new(DeviceModel::Nanos))
///     .await?;
///
/// session.wait_for_text("APPROVE", None, false).await?;
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    app: Option<PathBuf>,
    libraries: Vec<(String, PathBuf)>,
    host: Option<String>,
    runtime: Option<Arc<dyn ProcessRuntime>>,
    pool: Option<Arc<InstancePool>>,
    transport_port: Option<u16>,
    api_port: Option<u16>,
    classifier: Option<StatusClassifier>,
}

impl SessionBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application binary under test.
    #[inline]
    #[must_use]
    pub fn app(mut self, path: impl Into<PathBuf>) -> Self {
        self.app = Some(path.into());
        self
    }

    /// Adds an auxiliary library binary under a logical name.
    #[inline]
    #[must_use]
    pub fn library(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.libraries.push((name.into(), path.into()));
        self
    }

    /// Sets the host the emulator endpoints bind on.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the process runtime (defaults to [`LocalRuntime`]).
    #[inline]
    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn ProcessRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Attaches an instance pool; the session falls back to ad-hoc
    /// creation when the pool has no free slot for the model.
    #[inline]
    #[must_use]
    pub fn pool(mut self, pool: Arc<InstancePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Requests a specific command-exchange port for ad-hoc instances.
    #[inline]
    #[must_use]
    pub fn transport_port(mut self, port: u16) -> Self {
        self.transport_port = Some(port);
        self
    }

    /// Requests a specific screen/event API port for ad-hoc instances.
    #[inline]
    #[must_use]
    pub fn api_port(mut self, port: u16) -> Self {
        self.api_port = Some(port);
        self
    }

    /// Overrides the status classifier.
    #[inline]
    #[must_use]
    pub fn classifier(mut self, classifier: StatusClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Starts the session: acquires an instance, connects the transport,
    /// waits for the application's start text and captures the main-menu
    /// baseline.
    ///
    /// # Errors
    ///
    /// Returns configuration errors for a missing or wrong-model binary,
    /// [`Error::Launch`] when the instance cannot start, and the wait's
    /// timeout when the start text never appears. The instance is released
    /// or stopped before any of these propagate.
    pub async fn start(self, mut options: StartOptions) -> Result<Session> {
        options.resolve_defaults();

        let app_path = self
            .app
            .ok_or_else(|| Error::config("application binary path is required"))?;
        let mut app = AppBundle::new(app_path);
        for (lib_name, lib_path) in self.libraries {
            app = app.with_library(lib_name, lib_path);
        }
        app.validate()?;
        app.verify_model(options.model)?;

        let host = self.host.unwrap_or_else(|| crate::emulator::DEFAULT_HOST.to_string());
        let runtime: Arc<dyn ProcessRuntime> = self
            .runtime
            .unwrap_or_else(|| Arc::new(LocalRuntime::new()));
        let classifier = self.classifier.unwrap_or_default();
        let launch = options.launch_options();

        // Pooled acquisition first, ad-hoc creation as the fallback.
        let pooled = match &self.pool {
            Some(pool) => pool.acquire(options.model, &app).await?,
            None => None,
        };

        let (holder, name, transport_port, api_port) = match (pooled, self.pool) {
            (Some(leased), Some(pool)) => {
                let name = leased.name().to_string();
                let transport_port = leased.instance().transport_port();
                let api_port = leased.instance().api_port();
                info!(name = %name, "Using pooled instance");
                (
                    InstanceHolder::Pooled { pool, leased },
                    name,
                    transport_port,
                    api_port,
                )
            }
            _ => {
                let transport_port = match self.transport_port {
                    Some(port) => port,
                    None => pick_free_port(&host)?,
                };
                let api_port = match self.api_port {
                    Some(port) => port,
                    None => pick_free_port(&host)?,
                };
                let name = format!("{INSTANCE_BASE_NAME}{}", crate::emulator::short_suffix());
                let mut instance = EmulatorInstance::new(
                    name.clone(),
                    options.model,
                    transport_port,
                    api_port,
                    runtime,
                );
                info!(name = %name, "Starting ad-hoc instance");
                instance.start(&app, &launch).await?;
                (InstanceHolder::Owned(instance), name, transport_port, api_port)
            }
        };

        let api = DeviceApi::new(&host, api_port)?;
        let transport_url = Url::parse(&format!("http://{host}:{transport_port}/"))
            .map_err(|e| Error::config(format!("invalid transport address: {e}")))?;
        let transport = HttpTransport::new(transport_url, classifier);
        let faults = Arc::new(FaultRecorder::new(Box::new(transport)));

        let screen = options.model.screen();
        let mut session = Session {
            options,
            host,
            name,
            transport_port,
            api_port,
            api,
            faults,
            holder,
            main_menu: Snapshot::new(screen.width, screen.height, Vec::new()),
            initial_events: Vec::new(),
            rpc: None,
        };

        if let Err(e) = session.finish_start().await {
            warn!(name = %session.name, error = %e, "Session start failed, releasing instance");
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "Cleanup after failed start also failed");
            }
            return Err(e);
        }

        info!(name = %session.name, model = %session.options.model, "Session started");
        Ok(session)
    }
}

/// Reserves a free port by briefly binding it.
fn pick_free_port(host: &str) -> Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::DeviceModel;

    #[tokio::test]
    async fn test_start_requires_app() {
        let err = Session::builder()
            .start(StartOptions::new(DeviceModel::Nanos))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_start_rejects_missing_app() {
        let err = Session::builder()
            .app("/nonexistent/app.elf")
            .start(StartOptions::new(DeviceModel::Nanos))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AppNotFound { .. }));
    }

    #[test]
    fn test_pick_free_port() {
        let port = pick_free_port("127.0.0.1").unwrap();
        assert!(port > 0);
    }

    #[test]
    fn test_session_is_debug() {
        fn assert_debug<T: std::fmt::Debug>() {}
        assert_debug::<Session>();
    }
}
