//! Polling synchronization primitives.
//!
//! Every wait has one shape: probe the device state at a fixed short
//! interval under a deadline, succeed on match, fail with a named timeout.
//! Before each probe the engine consults the transport fault recorder: a
//! critical fault means the awaited state will never arrive, and the wait
//! aborts with that fault instead of waiting out its bound.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::emulator::UiEvent;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::transport::FaultRecorder;

use super::core::Session;
use super::{DEFAULT_KEY_DELAY, DEFAULT_METHOD_TIMEOUT, DEFAULT_WAIT_TIMEOUT};

// ============================================================================
// Polling engine
// ============================================================================

/// Polls `probe` until it reports a match or `bound` elapses.
///
/// The deadline and the critical-fault short-circuit both terminate the
/// same blocking call: the loop runs inside a [`timeout`], and each
/// iteration first checks the fault recorder.
pub(crate) async fn poll_until<F, Fut>(
    operation: &str,
    bound: Duration,
    faults: &FaultRecorder,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let outcome = timeout(bound, async {
        loop {
            if let Some(fault) = faults.critical_fault() {
                debug!(status = format!("{:#06x}", fault.status), operation, "Wait aborted by critical fault");
                return Err(Error::from(fault));
            }
            if probe().await {
                return Ok(());
            }
            sleep(DEFAULT_KEY_DELAY).await;
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_elapsed) => {
            debug!(operation, "Wait timed out");
            Err(Error::timeout(operation, bound.as_millis() as u64))
        }
    }
}

/// Compiles a wait pattern, case-insensitively unless requested otherwise.
fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    let source = if case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&source).map_err(|e| Error::config(format!("invalid wait pattern {pattern:?}: {e}")))
}

// ============================================================================
// Session - Synchronization
// ============================================================================

impl Session {
    /// Waits until the captured screen equals `target`.
    ///
    /// Succeeds on the first probe when the screen already matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] after `timeout` (default
    /// [`DEFAULT_WAIT_TIMEOUT`]) or the recorded critical transport fault.
    pub async fn wait_until_screen_is(
        &self,
        target: &Snapshot,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let bound = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let api = self.device_api().clone();
        let want = Arc::new(target.data.clone());
        debug!("Wait until screen is");
        poll_until(
            "screen to match the expected image",
            bound,
            self.fault_recorder(),
            move || {
                let api = api.clone();
                let want = Arc::clone(&want);
                async move {
                    match api.screenshot().await {
                        Ok(current) => current == *want,
                        // No data yet; keep polling.
                        Err(_) => false,
                    }
                }
            },
        )
        .await
    }

    /// Waits until the captured screen differs from `baseline`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] after `timeout` (default
    /// [`DEFAULT_WAIT_TIMEOUT`]) or the recorded critical transport fault.
    pub async fn wait_until_screen_is_not(
        &self,
        baseline: &Snapshot,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let bound = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let api = self.device_api().clone();
        let have = Arc::new(baseline.data.clone());
        debug!("Wait until screen is not");
        poll_until(
            "screen to change from the baseline image",
            bound,
            self.fault_recorder(),
            move || {
                let api = api.clone();
                let have = Arc::clone(&have);
                async move {
                    match api.screenshot().await {
                        Ok(current) => current != *have,
                        Err(_) => false,
                    }
                }
            },
        )
        .await
    }

    /// Waits until the event log differs element-wise from
    /// `baseline_events`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] after `timeout` (default
    /// [`DEFAULT_WAIT_TIMEOUT`]) or the recorded critical transport fault.
    pub async fn wait_for_screen_changes(
        &self,
        baseline_events: &[UiEvent],
        timeout: Option<Duration>,
    ) -> Result<()> {
        let bound = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let api = self.device_api().clone();
        let baseline: Arc<[UiEvent]> = baseline_events.into();
        debug!("Wait for screen changes");
        poll_until(
            "event log to change",
            bound,
            self.fault_recorder(),
            move || {
                let api = api.clone();
                let baseline = Arc::clone(&baseline);
                async move { api.events().await.as_slice() != &*baseline }
            },
        )
        .await
    }

    /// Waits until any current event's text matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid pattern, [`Error::Timeout`]
    /// after `timeout` (default [`DEFAULT_METHOD_TIMEOUT`]) or the recorded
    /// critical transport fault.
    pub async fn wait_for_text(
        &self,
        pattern: &str,
        timeout: Option<Duration>,
        case_sensitive: bool,
    ) -> Result<()> {
        let bound = timeout.unwrap_or(DEFAULT_METHOD_TIMEOUT);
        let regex = compile_pattern(pattern, case_sensitive)?;
        let api = self.device_api().clone();
        debug!(pattern, "Wait for text");
        poll_until(
            &format!("text matching {pattern:?}"),
            bound,
            self.fault_recorder(),
            move || {
                let api = api.clone();
                let regex = regex.clone();
                async move {
                    api.events()
                        .await
                        .iter()
                        .any(|event| regex.is_match(&event.text))
                }
            },
        )
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use crate::error::TransportFault;
    use crate::status::{ErrorClass, words};
    use crate::transport::ExchangeTransport;

    struct NullTransport;

    #[async_trait]
    impl ExchangeTransport for NullTransport {
        async fn exchange(&self, _command: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![0x90, 0x00])
        }
    }

    fn recorder() -> FaultRecorder {
        FaultRecorder::new(Box::new(NullTransport))
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_match_probes_once() {
        let faults = recorder();
        let probes = AtomicUsize::new(0);
        poll_until("anything", Duration::from_secs(5), &faults, || {
            probes.fetch_add(1, Ordering::SeqCst);
            async { true }
        })
        .await
        .unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds() {
        let faults = recorder();
        let started = Instant::now();
        let err = poll_until("the impossible", Duration::from_millis(1000), &faults, || async {
            false
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        let elapsed = started.elapsed();
        // Bounded overshoot: the deadline fires at the bound, well before
        // another full poll interval could pass.
        assert!(elapsed >= Duration::from_millis(1000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_names_operation() {
        let faults = recorder();
        let err = poll_until("text matching \"APPROVE\"", Duration::from_millis(100), &faults, || async { false })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("APPROVE"));
        assert!(err.to_string().contains("100ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_fault_short_circuits() {
        let faults = recorder();
        faults.record(TransportFault::new(
            words::INS_NOT_SUPPORTED,
            ErrorClass::Critical,
        ));

        let started = Instant::now();
        let err = poll_until("a screen change", Duration::from_secs(5), &faults, || async {
            false
        })
        .await
        .unwrap_err();

        assert!(err.is_critical());
        // Well under the 5s bound.
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_recorded_mid_wait_aborts_next_poll() {
        let faults = recorder();
        let probes = AtomicUsize::new(0);
        let err = poll_until("a screen change", Duration::from_secs(60), &faults, || {
            let n = probes.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                faults.record(TransportFault::new(
                    words::SIGN_VERIFY_ERROR,
                    ErrorClass::Critical,
                ));
            }
            async { false }
        })
        .await
        .unwrap_err();

        assert!(err.is_critical());
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_fault_does_not_abort() {
        let faults = recorder();
        faults.record(TransportFault::new(words::BUSY, ErrorClass::Recoverable));

        let probes = AtomicUsize::new(0);
        poll_until("a screen change", Duration::from_secs(5), &faults, || {
            let n = probes.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        })
        .await
        .unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_compile_pattern_case_modes() {
        let insensitive = compile_pattern("approve", false).unwrap();
        assert!(insensitive.is_match("APPROVE"));
        let sensitive = compile_pattern("approve", true).unwrap();
        assert!(!sensitive.is_match("APPROVE"));
        assert!(sensitive.is_match("approve"));
    }

    #[test]
    fn test_compile_pattern_rejects_invalid_regex() {
        assert!(compile_pattern("(unclosed", false).is_err());
    }
}
