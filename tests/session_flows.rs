//! End-to-end session flows against a scripted fake device.
//!
//! The fake serves the emulator's screen/event API and exchange endpoint
//! over real sockets; button and finger actions advance a step counter and
//! every step has its own screen bytes and event log.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::routing::{get, post};
use tempfile::NamedTempFile;

use emudriver::{
    DeviceModel, Error, InstancePool, LaunchSpec, ProcessHandle, ProcessRuntime, Result, Session,
    StartOptions, TextSearchOptions, UiEvent,
};

// ============================================================================
// Fake device
// ============================================================================

struct DeviceState {
    screens: Vec<Vec<u8>>,
    events: Vec<Vec<UiEvent>>,
    step: Mutex<usize>,
    apdu_reply: String,
}

impl DeviceState {
    fn current(&self) -> usize {
        let step = *self.step.lock().unwrap();
        step.min(self.screens.len() - 1)
    }

    fn advance(&self) {
        let mut step = self.step.lock().unwrap();
        *step = (*step + 1).min(self.screens.len() - 1);
    }
}

struct FakeDevice {
    api_port: u16,
    transport_port: u16,
}

fn text_event(text: &str) -> UiEvent {
    UiEvent {
        text: text.to_string(),
        x: 10,
        y: 20,
        width: 100,
        height: 30,
    }
}

async fn screenshot(State(state): State<Arc<DeviceState>>) -> Vec<u8> {
    state.screens[state.current()].clone()
}

async fn events_handler(State(state): State<Arc<DeviceState>>) -> Json<serde_json::Value> {
    let events = &state.events[state.current()];
    Json(serde_json::json!({ "events": events }))
}

async fn button(
    State(state): State<Arc<DeviceState>>,
    UrlPath(_which): UrlPath<String>,
    Json(payload): Json<serde_json::Value>,
) {
    if payload["action"] == "reset" {
        *state.step.lock().unwrap() = 0;
    } else {
        state.advance();
    }
}

async fn finger(State(state): State<Arc<DeviceState>>) {
    state.advance();
}

async fn apdu(State(state): State<Arc<DeviceState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": state.apdu_reply }))
}

impl FakeDevice {
    /// Starts the fake on two listeners: the screen/event API and the
    /// exchange transport.
    async fn start(screens: Vec<Vec<u8>>, events: Vec<Vec<UiEvent>>, apdu_reply: &str) -> Self {
        assert_eq!(screens.len(), events.len());
        let state = Arc::new(DeviceState {
            screens,
            events,
            step: Mutex::new(0),
            apdu_reply: apdu_reply.to_string(),
        });

        let app = Router::new()
            .route("/screenshot", get(screenshot))
            .route("/events", get(events_handler).delete(|| async {}))
            .route("/button/:which", post(button))
            .route("/finger", post(finger))
            .route("/apdu", post(apdu))
            .with_state(state);

        let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_port = api_listener.local_addr().unwrap().port();
        let transport_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport_port = transport_listener.local_addr().unwrap().port();

        let api_app = app.clone();
        tokio::spawn(async move {
            axum::serve(api_listener, api_app).await.unwrap();
        });
        tokio::spawn(async move {
            axum::serve(transport_listener, app).await.unwrap();
        });

        Self {
            api_port,
            transport_port,
        }
    }
}

// ============================================================================
// Session plumbing
// ============================================================================

struct NoopRuntime;

#[async_trait]
impl ProcessRuntime for NoopRuntime {
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        Ok(ProcessHandle {
            id: spec.name.clone(),
            pid: None,
        })
    }

    async fn stop(&self, _handle: &ProcessHandle, _grace: Duration) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _handle: &ProcessHandle) -> Result<()> {
        Ok(())
    }

    async fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<ProcessHandle>> {
        Ok(Vec::new())
    }
}

/// Writes a minimal ELF image whose entry word matches `model`.
fn fake_app(model: DeviceModel) -> NamedTempFile {
    let entry: u32 = match model {
        DeviceModel::Nanos => 0xc0d0_0001,
        _ => 0xc0de_0001,
    };
    let mut bytes = vec![0u8; 0x34];
    bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    bytes[4] = 1;
    bytes[0x18..0x1c].copy_from_slice(&entry.to_le_bytes());

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();
    file
}

async fn start_session(fake: &FakeDevice, model: DeviceModel) -> (Session, NamedTempFile) {
    let app = fake_app(model);
    let session = Session::builder()
        .app(app.path())
        .runtime(Arc::new(NoopRuntime))
        .transport_port(fake.transport_port)
        .api_port(fake.api_port)
        .start(
            StartOptions::new(model)
                .with_start_delay(Duration::from_secs(5))
                .with_start_timeout(Duration::from_secs(5)),
        )
        .await
        .expect("session start");
    (session, app)
}

fn ready_events() -> Vec<UiEvent> {
    vec![text_event("Ready")]
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn session_start_captures_baseline() {
    let fake = FakeDevice::start(vec![vec![0xaa; 16]], vec![ready_events()], "9000").await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    assert_eq!(session.main_menu_snapshot().data, vec![0xaa; 16]);
    assert_eq!(session.initial_events().len(), 1);
    assert_eq!(session.initial_events()[0].text, "Ready");
    assert_eq!(session.model(), DeviceModel::Nanos);

    session.close().await.unwrap();
}

#[tokio::test]
async fn wait_until_screen_is_succeeds_immediately_on_match() {
    let fake = FakeDevice::start(vec![vec![0x01; 8]], vec![ready_events()], "9000").await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    let baseline = session.main_menu_snapshot().clone();
    let started = Instant::now();
    session
        .wait_until_screen_is(&baseline, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    session.close().await.unwrap();
}

#[tokio::test]
async fn wait_for_text_times_out_with_bounded_overshoot() {
    let fake = FakeDevice::start(vec![vec![0x01; 8]], vec![ready_events()], "9000").await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    let started = Instant::now();
    let err = session
        .wait_for_text("APPROVE", Some(Duration::from_millis(1000)), false)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");

    session.close().await.unwrap();
}

#[tokio::test]
async fn critical_fault_aborts_wait_before_timeout() {
    // Every exchange answers "instruction not supported".
    let fake = FakeDevice::start(vec![vec![0x01; 8]], vec![ready_events()], "6d00").await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    let err = session.exchange(&[0xe0, 0x01, 0x00, 0x00, 0x00]).await.unwrap_err();
    assert!(err.is_critical());

    let baseline = session.main_menu_snapshot().clone();
    let started = Instant::now();
    let wait_err = session
        .wait_until_screen_is_not(&baseline, Some(Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert!(wait_err.is_critical());
    // Well under the 5s bound.
    assert!(started.elapsed() < Duration::from_secs(1));

    session.close().await.unwrap();
}

#[tokio::test]
async fn navigate_captures_one_image_per_step_plus_initial() {
    let screens: Vec<Vec<u8>> = (0u8..4).map(|step| vec![step; 32]).collect();
    let events = vec![ready_events(); 4];
    let fake = FakeDevice::start(screens.clone(), events, "9000").await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    let workdir = tempfile::tempdir().unwrap();
    let schedule = emudriver::schedule_to_actions(&[3]);
    let last_index = session
        .navigate(workdir.path(), "walk", &schedule, true, true, 0, false)
        .await
        .unwrap();
    assert_eq!(last_index, 3);

    let candidate = workdir.path().join("snapshots-tmp").join("walk");
    for (index, screen) in screens.iter().enumerate() {
        let file = candidate.join(format!("{index:05}.png"));
        assert_eq!(&std::fs::read(&file).unwrap(), screen, "index {index}");
    }
    assert_eq!(std::fs::read_dir(&candidate).unwrap().count(), 4);

    session.close().await.unwrap();
}

/// Encodes a tiny PNG whose pixels depend on `seed`.
fn png_bytes(seed: u8) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([seed, 0, 0, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    bytes
}

fn copy_candidate_to_golden(path: &Path, testcase: &str) {
    let candidate = path.join("snapshots-tmp").join(testcase);
    let golden = path.join("snapshots").join(testcase);
    std::fs::create_dir_all(&golden).unwrap();
    for entry in std::fs::read_dir(&candidate).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(entry.path(), golden.join(entry.file_name())).unwrap();
    }
}

#[tokio::test]
async fn navigate_until_text_finds_keyword_and_compares() {
    let screens: Vec<Vec<u8>> = (0u8..4).map(png_bytes).collect();
    let events = vec![
        ready_events(),
        vec![text_event("Review transaction")],
        vec![text_event("APPROVE")],
        ready_events(),
    ];
    let fake = FakeDevice::start(screens, events, "9000").await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    let workdir = tempfile::tempdir().unwrap();
    let options = TextSearchOptions {
        wait_for_initial_events_change: false,
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let last_index = session
        .navigate_until_text(workdir.path(), "approve_flow", "APPROVE", &options)
        .await
        .unwrap();
    assert_eq!(last_index, 3);

    copy_candidate_to_golden(workdir.path(), "approve_flow");
    assert!(session
        .compare_snapshots(workdir.path(), "approve_flow", last_index)
        .unwrap());

    session.close().await.unwrap();
}

#[tokio::test]
async fn navigate_until_text_enforces_per_step_bound() {
    let fake = FakeDevice::start(
        vec![vec![0x01; 8], vec![0x02; 8]],
        vec![ready_events(), ready_events()],
        "9000",
    )
    .await;
    let (mut session, _app) = start_session(&fake, DeviceModel::Nanos).await;

    let workdir = tempfile::tempdir().unwrap();
    // A zero step budget trips on the very first check.
    let options = TextSearchOptions {
        wait_for_initial_events_change: false,
        wait_for_screen_update: false,
        timeout: Duration::ZERO,
        take_snapshots: false,
        ..Default::default()
    };
    let err = session
        .navigate_until_text(workdir.path(), "missing", "NEVER_SHOWN", &options)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("NEVER_SHOWN"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn empty_pool_falls_back_to_ad_hoc_instance() {
    let fake = FakeDevice::start(vec![vec![0x07; 8]], vec![ready_events()], "9000").await;
    let app = fake_app(DeviceModel::Nanos);

    // A pool with no slots for the model yields None and the builder
    // creates an ad-hoc instance on the requested ports.
    let pool = Arc::new(InstancePool::new(Arc::new(NoopRuntime)));
    let mut session = Session::builder()
        .app(app.path())
        .runtime(Arc::new(NoopRuntime))
        .pool(pool)
        .transport_port(fake.transport_port)
        .api_port(fake.api_port)
        .start(
            StartOptions::new(DeviceModel::Nanos)
                .with_start_delay(Duration::from_secs(5))
                .with_start_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(session.api_port(), fake.api_port);
    session.close().await.unwrap();
}

#[tokio::test]
async fn wrong_model_binary_is_a_configuration_error() {
    let fake = FakeDevice::start(vec![vec![0x07; 8]], vec![ready_events()], "9000").await;
    // A stax-entry binary presented as a nanos app.
    let app = fake_app(DeviceModel::Stax);

    let err = Session::builder()
        .app(app.path())
        .runtime(Arc::new(NoopRuntime))
        .transport_port(fake.transport_port)
        .api_port(fake.api_port)
        .start(StartOptions::new(DeviceModel::Nanos))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}
