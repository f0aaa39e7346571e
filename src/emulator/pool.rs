//! Pre-started instance pool.
//!
//! Launching a fresh emulator instance is the dominant cost of a test run;
//! the pool keeps warm instances per model and hands them out to sessions.
//! The one invariant that matters more than utilization: a slot whose state
//! could not be restored is evicted, never handed out again.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                InstancePool                   │
//! │  nanos → [slot 0][slot 1]   ports 10000+i     │
//! │  stax  → [slot 0]           ports 10300+i     │
//! │                                               │
//! │  acquire: flip busy, move instance out,       │
//! │           reset + load payload                │
//! │  release: reset; ok → slot available again    │
//! │           err → slot evicted, process stopped │
//! └───────────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::device::DeviceModel;
use crate::error::{Error, Result};

use super::{INSTANCE_BASE_NAME, short_suffix};
use super::api::DeviceApi;
use super::app::AppBundle;
use super::instance::EmulatorInstance;
use super::runtime::{LaunchOptions, ProcessRuntime};

// ============================================================================
// Constants
// ============================================================================

/// Default host the emulator endpoints bind on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// First command-exchange port of the first model's range.
const TRANSPORT_PORT_BASE: u16 = 10000;

/// First screen/event API port of the first model's range.
const API_PORT_BASE: u16 = 15000;

/// Width of each model's port range.
const MODEL_PORT_STRIDE: u16 = 100;

/// How long a freshly launched instance may take to answer its
/// screen-capture endpoint.
const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Settle time after a device reset before the slot is reused.
const RESET_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Returns the deterministic port pair for a pool slot.
///
/// Ranges are statically partitioned per model so instances never compete
/// for ports at runtime.
#[must_use]
pub fn pool_ports(model: DeviceModel, index: u16) -> (u16, u16) {
    let offset = MODEL_PORT_STRIDE * model.port_range_index() + index;
    (TRANSPORT_PORT_BASE + offset, API_PORT_BASE + offset)
}

// ============================================================================
// PoolConfig
// ============================================================================

/// Pool sizing: how many warm instances to keep per model, and which
/// application to boot them with until a session loads its own.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    seed_app: AppBundle,
    counts: FxHashMap<DeviceModel, usize>,
}

impl PoolConfig {
    /// Creates a configuration warming instances with `seed_app`.
    #[must_use]
    pub fn new(seed_app: AppBundle) -> Self {
        Self {
            seed_app,
            counts: FxHashMap::default(),
        }
    }

    /// Sets the number of warm instances for a model.
    #[must_use]
    pub fn with_instances(mut self, model: DeviceModel, count: usize) -> Self {
        self.counts.insert(model, count);
        self
    }
}

// ============================================================================
// PoolStatus
// ============================================================================

/// Occupancy counters for one model's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Number of slots in the pool.
    pub total: usize,
    /// Slots not referenced by any session.
    pub available: usize,
    /// Slots currently leased to a session.
    pub busy: usize,
}

// ============================================================================
// PoolSlot
// ============================================================================

/// One pooled instance with its availability bookkeeping.
///
/// While leased, the instance itself is moved out to the session; the slot
/// keeps the metadata and waits for the instance to come back (or for
/// eviction).
struct PoolSlot {
    name: String,
    instance: Option<EmulatorInstance>,
    available: bool,
    #[allow(dead_code)]
    created_at: Instant,
    last_used: Instant,
}

// ============================================================================
// PooledInstance
// ============================================================================

/// A leased pool instance, exclusively owned by one session until it is
/// given back through [`InstancePool::release`].
pub struct PooledInstance {
    name: String,
    model: DeviceModel,
    instance: EmulatorInstance,
}

impl PooledInstance {
    /// Returns the slot name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the leased instance.
    #[inline]
    #[must_use]
    pub fn instance(&self) -> &EmulatorInstance {
        &self.instance
    }
}

impl fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledInstance")
            .field("name", &self.name)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// InstancePool
// ============================================================================

/// Per-model pool of pre-started emulator instances.
///
/// Constructed explicitly and passed by reference (`Arc`) to whatever owns
/// test-run setup; several independent pools can coexist.
pub struct InstancePool {
    runtime: Arc<dyn ProcessRuntime>,
    host: String,
    start_timeout: Duration,
    launch: LaunchOptions,
    pools: Mutex<FxHashMap<DeviceModel, Vec<PoolSlot>>>,
}

// ============================================================================
// InstancePool - Constructor
// ============================================================================

impl InstancePool {
    /// Creates an empty pool on the default host.
    #[must_use]
    pub fn new(runtime: Arc<dyn ProcessRuntime>) -> Self {
        Self {
            runtime,
            host: DEFAULT_HOST.to_string(),
            start_timeout: DEFAULT_START_TIMEOUT,
            launch: LaunchOptions::default(),
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// Sets the host the emulator endpoints bind on.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets how long launched instances may take to become ready.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the launch parameters used for pool instances.
    #[must_use]
    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }
}

// ============================================================================
// InstancePool - Public API
// ============================================================================

impl InstancePool {
    /// Launches the configured warm instances.
    ///
    /// Stale processes from a prior crashed run (matched by name prefix)
    /// are removed first. All launches run concurrently; an instance that
    /// fails to launch is skipped, and a model whose every launch fails is
    /// dropped from the pool with an error log while sibling models proceed
    /// independently.
    pub async fn initialize(&self, config: &PoolConfig) -> Result<()> {
        self.cleanup_stale().await;

        let launches = config
            .counts
            .iter()
            .filter(|&(_, &count)| count > 0)
            .map(|(&model, &count)| {
                let seed = config.seed_app.clone();
                async move {
                    let slots = self.launch_pool_for_model(model, count, &seed).await;
                    (model, count, slots)
                }
            });

        let results = join_all(launches).await;

        let mut pools = self.pools.lock();
        for (model, requested, slots) in results {
            if slots.is_empty() {
                error!(%model, requested, "Failed to launch any pool instance for model");
                continue;
            }
            info!(%model, launched = slots.len(), requested, "Pool ready");
            pools.insert(model, slots);
        }
        Ok(())
    }

    /// Leases an instance of `model` and loads `app` into it.
    ///
    /// Returns `Ok(None)` when no pool exists for the model or every slot
    /// is busy; the caller falls back to ad-hoc instance creation, and this is
    /// not a fault.
    ///
    /// # Errors
    ///
    /// Returns the reset/load failure after routing the lease back through
    /// the release path (which evicts the slot).
    pub async fn acquire(
        &self,
        model: DeviceModel,
        app: &AppBundle,
    ) -> Result<Option<PooledInstance>> {
        let Some(mut leased) = self.lease_first_available(model) else {
            return Ok(None);
        };
        debug!(name = %leased.name, %model, "Slot leased");

        match self.reset_and_load(&mut leased, app).await {
            Ok(()) => Ok(Some(leased)),
            Err(e) => {
                warn!(name = %leased.name, error = %e, "Reset/load failed for leased slot");
                self.release(leased).await;
                Err(e)
            }
        }
    }

    /// Gives a leased instance back.
    ///
    /// The device state is reset first; if that fails the slot is evicted
    /// from the pool entirely rather than returned in a possibly-corrupt
    /// state.
    pub async fn release(&self, leased: PooledInstance) {
        if let Err(e) = self.reset_state(&leased).await {
            warn!(name = %leased.name, error = %e, "Reset failed, evicting slot from pool");
            self.evict(leased).await;
            return;
        }

        {
            let mut pools = self.pools.lock();
            if let Some(slots) = pools.get_mut(&leased.model)
                && let Some(slot) = slots.iter_mut().find(|s| s.name == leased.name)
            {
                slot.instance = Some(leased.instance);
                slot.available = true;
                slot.last_used = Instant::now();
                debug!(name = %slot.name, "Slot released back to pool");
                return;
            }
        }

        // The slot was removed while leased (cleanup ran); stop the orphan.
        warn!(name = %leased.name, "Slot no longer pooled, stopping instance");
        let mut instance = leased.instance;
        if let Err(e) = instance.stop().await {
            warn!(name = %instance.name(), error = %e, "Failed to stop orphaned instance");
        }
    }

    /// Stops every pooled instance and clears all pool state. Idempotent.
    pub async fn cleanup(&self) {
        let drained: Vec<PoolSlot> = {
            let mut pools = self.pools.lock();
            pools.drain().flat_map(|(_, slots)| slots).collect()
        };

        let stops = drained
            .into_iter()
            .filter_map(|slot| slot.instance)
            .map(|mut instance| async move {
                if let Err(e) = instance.stop().await {
                    warn!(name = %instance.name(), error = %e, "Failed to stop pooled instance");
                }
            });
        join_all(stops).await;
        info!("Instance pool cleaned up");
    }

    /// Returns per-model occupancy counters.
    #[must_use]
    pub fn status(&self) -> FxHashMap<DeviceModel, PoolStatus> {
        let pools = self.pools.lock();
        pools
            .iter()
            .map(|(&model, slots)| {
                let available = slots.iter().filter(|s| s.available).count();
                (
                    model,
                    PoolStatus {
                        total: slots.len(),
                        available,
                        busy: slots.len() - available,
                    },
                )
            })
            .collect()
    }
}

// ============================================================================
// InstancePool - Internal
// ============================================================================

impl InstancePool {
    /// Flips the first available slot to busy and moves its instance out.
    ///
    /// The flip completes before any suspension point, so a slot can never
    /// be observed available by two sessions.
    fn lease_first_available(&self, model: DeviceModel) -> Option<PooledInstance> {
        let mut pools = self.pools.lock();
        let slots = pools.get_mut(&model)?;
        for slot in slots.iter_mut() {
            if slot.available
                && let Some(instance) = slot.instance.take()
            {
                slot.available = false;
                slot.last_used = Instant::now();
                return Some(PooledInstance {
                    name: slot.name.clone(),
                    model,
                    instance,
                });
            }
        }
        None
    }

    async fn launch_pool_for_model(
        &self,
        model: DeviceModel,
        count: usize,
        seed: &AppBundle,
    ) -> Vec<PoolSlot> {
        let launches = (0..count).map(|index| async move {
            self.launch_slot(model, index as u16, seed)
                .await
                .map_err(|e| (index, e))
        });

        let mut slots = Vec::with_capacity(count);
        for result in join_all(launches).await {
            match result {
                Ok(slot) => slots.push(slot),
                Err((index, e)) => {
                    warn!(%model, index, error = %e, "Pool instance launch failed");
                }
            }
        }
        slots
    }

    async fn launch_slot(
        &self,
        model: DeviceModel,
        index: u16,
        seed: &AppBundle,
    ) -> Result<PoolSlot> {
        let (transport_port, api_port) = pool_ports(model, index);
        let name = format!(
            "{INSTANCE_BASE_NAME}pool-{model}-{index}-{}",
            short_suffix()
        );

        let mut instance = EmulatorInstance::new(
            name.clone(),
            model,
            transport_port,
            api_port,
            Arc::clone(&self.runtime),
        );
        instance.start(seed, &self.launch).await?;

        if let Err(e) = self.wait_until_ready(&name, api_port).await {
            if let Err(stop_err) = instance.stop().await {
                warn!(name = %name, error = %stop_err, "Failed to stop unready instance");
            }
            return Err(e);
        }

        let now = Instant::now();
        Ok(PoolSlot {
            name,
            instance: Some(instance),
            available: true,
            created_at: now,
            last_used: now,
        })
    }

    async fn reset_and_load(&self, leased: &mut PooledInstance, app: &AppBundle) -> Result<()> {
        self.reset_state(leased).await?;
        leased.instance.restart_with(app, &self.launch).await?;
        self.wait_until_ready(&leased.name, leased.instance.api_port())
            .await
    }

    /// Clears volatile device state: reset to the initial screen, empty the
    /// event log, then let the screen settle.
    async fn reset_state(&self, leased: &PooledInstance) -> Result<()> {
        let api = DeviceApi::new(&self.host, leased.instance.api_port())?;
        api.reset_device()
            .await
            .map_err(|e| Error::reset(&leased.name, e.to_string()))?;
        api.delete_events()
            .await
            .map_err(|e| Error::reset(&leased.name, e.to_string()))?;
        sleep(RESET_SETTLE_DELAY).await;
        Ok(())
    }

    async fn evict(&self, leased: PooledInstance) {
        {
            let mut pools = self.pools.lock();
            if let Some(slots) = pools.get_mut(&leased.model) {
                slots.retain(|s| s.name != leased.name);
            }
        }
        let mut instance = leased.instance;
        if let Err(e) = instance.stop().await {
            warn!(name = %instance.name(), error = %e, "Failed to stop evicted instance");
        }
    }

    async fn wait_until_ready(&self, name: &str, api_port: u16) -> Result<()> {
        let api = DeviceApi::new(&self.host, api_port)?;
        let bound = self.start_timeout;
        timeout(bound, async {
            loop {
                if api.screenshot().await.is_ok() {
                    return;
                }
                sleep(READY_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| {
            Error::launch(
                name,
                format!("did not become ready within {}ms", bound.as_millis()),
            )
        })
    }

    async fn cleanup_stale(&self) {
        match self.runtime.list_by_prefix(INSTANCE_BASE_NAME).await {
            Ok(handles) if !handles.is_empty() => {
                warn!(count = handles.len(), "Removing stale emulator processes");
                let removals = handles.iter().map(|handle| async move {
                    if let Err(e) = self.runtime.remove(handle).await {
                        warn!(name = %handle.id, error = %e, "Failed to remove stale process");
                    }
                });
                join_all(removals).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Stale process cleanup failed"),
        }
    }

    #[cfg(test)]
    fn insert_slot_for_test(
        &self,
        model: DeviceModel,
        name: &str,
        transport_port: u16,
        api_port: u16,
    ) {
        let now = Instant::now();
        let slot = PoolSlot {
            name: name.to_string(),
            instance: Some(EmulatorInstance::new(
                name,
                model,
                transport_port,
                api_port,
                Arc::clone(&self.runtime),
            )),
            available: true,
            created_at: now,
            last_used: now,
        };
        self.pools.lock().entry(model).or_default().push(slot);
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
    use axum::Json;
    use axum::Router;
    use axum::routing::{get, post};

    use crate::emulator::runtime::{LaunchSpec, ProcessHandle};

    /// Runtime that records calls without touching the OS.
    #[derive(Default)]
    struct FakeRuntime {
        starts: AtomicUsize,
        stops: AtomicUsize,
        stale: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcessRuntime for FakeRuntime {
        async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessHandle {
                id: spec.name.clone(),
                pid: Some(42),
            })
        }

        async fn stop(&self, _handle: &ProcessHandle, _grace: Duration) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn remove(&self, handle: &ProcessHandle) -> Result<()> {
            self.removed.lock().push(handle.id.clone());
            Ok(())
        }

        async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ProcessHandle>> {
            Ok(self
                .stale
                .lock()
                .iter()
                .filter(|name| name.starts_with(prefix))
                .map(|name| ProcessHandle {
                    id: name.clone(),
                    pid: None,
                })
                .collect())
        }
    }

    /// Serves a minimal screen/event API that accepts everything.
    async fn spawn_fake_device() -> u16 {
        let app = Router::new()
            .route("/screenshot", get(|| async { vec![0u8, 1, 2, 3] }))
            .route(
                "/events",
                get(|| async { Json(serde_json::json!({ "events": [] })) })
                    .delete(|| async {}),
            )
            .route("/button/:which", post(|| async {}))
            .route("/finger", post(|| async {}));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn temp_app() -> (tempfile::NamedTempFile, AppBundle) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"stub").unwrap();
        let bundle = AppBundle::new(file.path());
        (file, bundle)
    }

    #[test]
    fn test_pool_ports_are_partitioned_per_model() {
        assert_eq!(pool_ports(DeviceModel::Nanos, 0), (10000, 15000));
        assert_eq!(pool_ports(DeviceModel::Nanos, 3), (10003, 15003));
        assert_eq!(pool_ports(DeviceModel::Nanox, 0), (10100, 15100));
        assert_eq!(pool_ports(DeviceModel::Flex, 1), (10401, 15401));
    }

    #[tokio::test]
    async fn test_acquire_without_pool_returns_none() {
        let pool = InstancePool::new(Arc::new(FakeRuntime::default()));
        let (_file, app) = temp_app();
        let leased = pool.acquire(DeviceModel::Nanos, &app).await.unwrap();
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn test_pool_capacity_and_exhaustion() {
        let port = spawn_fake_device().await;
        let pool = InstancePool::new(Arc::new(FakeRuntime::default()));
        pool.insert_slot_for_test(DeviceModel::Nanos, "slot-a", 10000, port);
        pool.insert_slot_for_test(DeviceModel::Nanos, "slot-b", 10001, port);
        let (_file, app) = temp_app();

        // Two concurrent acquisitions both succeed with distinct slots.
        let (first, second) = tokio::join!(
            pool.acquire(DeviceModel::Nanos, &app),
            pool.acquire(DeviceModel::Nanos, &app),
        );
        let first = first.unwrap().expect("first lease");
        let second = second.unwrap().expect("second lease");
        assert_ne!(first.name(), second.name());

        // The third is a clean None, not an error.
        let third = pool.acquire(DeviceModel::Nanos, &app).await.unwrap();
        assert!(third.is_none());

        let status = pool.status()[&DeviceModel::Nanos];
        assert_eq!(status, PoolStatus { total: 2, available: 0, busy: 2 });

        // After a release the same slot can be leased again.
        let released_name = first.name().to_string();
        pool.release(first).await;
        let again = pool
            .acquire(DeviceModel::Nanos, &app)
            .await
            .unwrap()
            .expect("reacquire");
        assert_eq!(again.name(), released_name);
    }

    #[tokio::test]
    async fn test_release_failure_evicts_slot() {
        // No device API behind this port: reset fails immediately.
        let dead_port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let runtime = Arc::new(FakeRuntime::default());
        let pool = InstancePool::new(runtime.clone());
        pool.insert_slot_for_test(DeviceModel::Stax, "slot-dead", 10300, dead_port);

        let leased = pool
            .lease_first_available(DeviceModel::Stax)
            .expect("lease");
        pool.release(leased).await;

        assert!(pool.status().get(&DeviceModel::Stax).is_none_or(|s| s.total == 0));
    }

    #[tokio::test]
    async fn test_initialize_removes_stale_processes() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime
            .stale
            .lock()
            .extend(["emudriver-old-1".to_string(), "emudriver-old-2".to_string()]);

        let pool = InstancePool::new(runtime.clone())
            .with_start_timeout(Duration::from_millis(200));
        let (_file, seed) = temp_app();
        // No counts: nothing to launch, but stale cleanup still runs.
        pool.initialize(&PoolConfig::new(seed)).await.unwrap();

        assert_eq!(runtime.removed.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_initialize_tolerates_unready_model() {
        // Instances "start" but nothing serves their API ports, so readiness
        // times out and the model is dropped from the pool.
        let runtime = Arc::new(FakeRuntime::default());
        let pool = InstancePool::new(runtime.clone())
            .with_start_timeout(Duration::from_millis(200));
        let (_file, seed) = temp_app();
        let config = PoolConfig::new(seed).with_instances(DeviceModel::Nanos, 1);

        pool.initialize(&config).await.unwrap();
        assert!(pool.status().get(&DeviceModel::Nanos).is_none());
        // The unready instance was stopped, not leaked.
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let port = spawn_fake_device().await;
        let runtime = Arc::new(FakeRuntime::default());
        let pool = InstancePool::new(runtime.clone());
        pool.insert_slot_for_test(DeviceModel::Nanox, "slot-x", 10100, port);

        pool.cleanup().await;
        pool.cleanup().await;
        assert!(pool.status().is_empty());
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 0);
    }
}
