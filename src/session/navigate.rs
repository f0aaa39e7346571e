//! Navigation state machine and golden-set flows.
//!
//! Navigation moves a cursor (the step index) through a UI walk, capturing
//! one image per step into the candidate directory:
//!
//! ```text
//! {path}/snapshots/{testcase}/00000.png      golden reference set
//! {path}/snapshots-tmp/{testcase}/00000.png  candidate set (this run)
//! ```
//!
//! Walks are either an explicit action schedule ([`Session::navigate`]) or
//! "advance until this text appears" ([`Session::navigate_until_text`]);
//! both chain into the byte-exact golden comparison.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::device::{
    ButtonKind, NavAction, TouchButton, TouchNavigation, special_mode_navigation,
    toggle_expert_mode_navigation, touch_element,
};
use crate::emulator::{PhysicalButton, UiEvent};
use crate::error::{Error, Result};
use crate::snapshot::{Snapshot, compare_snapshot_dirs, indexed_png};

use super::core::Session;
use super::{DEFAULT_KEY_DELAY, DEFAULT_METHOD_TIMEOUT};

// ============================================================================
// Path convention
// ============================================================================

/// Returns the golden reference directory for a test case.
fn golden_dir(path: &Path, testcase: &str) -> PathBuf {
    path.join("snapshots").join(testcase)
}

/// Returns the candidate (scratch) directory for a test case.
fn candidate_dir(path: &Path, testcase: &str) -> PathBuf {
    path.join("snapshots-tmp").join(testcase)
}

/// Returns the capture target for a step, `None` when snapshotting is off.
fn snapshot_target(dir: &Path, index: usize, take_snapshots: bool) -> Option<PathBuf> {
    take_snapshots.then(|| indexed_png(dir, index))
}

// ============================================================================
// TextSearchOptions
// ============================================================================

/// Options for [`Session::navigate_until_text`].
#[derive(Debug, Clone)]
pub struct TextSearchOptions {
    /// Block on a screen change after each advance (otherwise only the
    /// fixed floor delay is applied).
    pub wait_for_screen_update: bool,
    /// Capture a per-step image into the candidate directory.
    pub take_snapshots: bool,
    /// Step index the walk starts at.
    pub start_index: usize,
    /// Per-step bound on finding the text.
    pub timeout: Duration,
    /// Perform the confirmation action once the text is found.
    pub run_last_action: bool,
    /// Wait for the event log to move off the session's initial events
    /// before the first capture.
    pub wait_for_initial_events_change: bool,
}

impl Default for TextSearchOptions {
    fn default() -> Self {
        Self {
            wait_for_screen_update: true,
            take_snapshots: true,
            start_index: 0,
            timeout: DEFAULT_METHOD_TIMEOUT,
            run_last_action: true,
            wait_for_initial_events_change: true,
        }
    }
}

// ============================================================================
// Session - Input primitives
// ============================================================================

impl Session {
    /// Presses a physical button, waits for the UI to settle and captures
    /// the resulting screen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on touch devices, wait timeouts, or the
    /// underlying endpoint error.
    pub async fn click(
        &self,
        button: PhysicalButton,
        filename: Option<&Path>,
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<Snapshot> {
        if self.options.model.is_touch() {
            return Err(Error::config(
                "click is only available on button devices",
            ));
        }

        let prev_events = self.events().await;
        let prev_screen = self.snapshot(None).await?;

        self.device_api().press_button(button).await?;
        debug!(button = button.as_str(), file = ?filename, "Click");

        self.settle(
            &prev_screen,
            &prev_events,
            wait_for_screen_update,
            wait_for_events_change,
        )
        .await?;
        self.snapshot(filename).await
    }

    /// Presses and releases the left button.
    ///
    /// # Errors
    ///
    /// See [`Session::click`].
    pub async fn click_left(
        &self,
        filename: Option<&Path>,
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<Snapshot> {
        self.click(
            PhysicalButton::Left,
            filename,
            wait_for_screen_update,
            wait_for_events_change,
        )
        .await
    }

    /// Presses and releases the right button.
    ///
    /// # Errors
    ///
    /// See [`Session::click`].
    pub async fn click_right(
        &self,
        filename: Option<&Path>,
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<Snapshot> {
        self.click(
            PhysicalButton::Right,
            filename,
            wait_for_screen_update,
            wait_for_events_change,
        )
        .await
    }

    /// Presses and releases both buttons together.
    ///
    /// # Errors
    ///
    /// See [`Session::click`].
    pub async fn click_both(
        &self,
        filename: Option<&Path>,
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<Snapshot> {
        self.click(
            PhysicalButton::Both,
            filename,
            wait_for_screen_update,
            wait_for_events_change,
        )
        .await
    }

    /// Taps (or swipes) the touch panel, waits for the UI to settle and
    /// captures the resulting screen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on button devices, wait timeouts, or the
    /// underlying endpoint error.
    pub async fn finger_touch(
        &self,
        button: &TouchButton,
        filename: Option<&Path>,
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<Snapshot> {
        if !self.options.model.is_touch() {
            return Err(Error::config(
                "finger_touch is only available on touch devices",
            ));
        }

        let prev_events = self.events().await;
        let prev_screen = self.snapshot(None).await?;

        self.device_api().finger_touch(button).await?;
        debug!(x = button.x, y = button.y, file = ?filename, "Touch");

        self.settle(
            &prev_screen,
            &prev_events,
            wait_for_screen_update,
            wait_for_events_change,
        )
        .await?;
        self.snapshot(filename).await
    }

    /// Performs one navigation action and captures the resulting screen.
    ///
    /// # Errors
    ///
    /// Propagates the action's endpoint and wait errors.
    pub async fn run_action(
        &self,
        action: NavAction,
        filename: Option<&Path>,
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<Snapshot> {
        match action {
            NavAction::LeftClick => {
                self.click_left(filename, wait_for_screen_update, wait_for_events_change)
                    .await
            }
            NavAction::RightClick => {
                self.click_right(filename, wait_for_screen_update, wait_for_events_change)
                    .await
            }
            NavAction::BothClick => {
                self.click_both(filename, wait_for_screen_update, wait_for_events_change)
                    .await
            }
            NavAction::Touch(button) => {
                self.finger_touch(
                    &button,
                    filename,
                    wait_for_screen_update,
                    wait_for_events_change,
                )
                .await
            }
        }
    }

    /// Waits out a UI transition after an input action.
    ///
    /// Some transitions need the floor delay even when screen-diffing is
    /// off.
    async fn settle(
        &self,
        prev_screen: &Snapshot,
        prev_events: &[UiEvent],
        wait_for_screen_update: bool,
        wait_for_events_change: bool,
    ) -> Result<()> {
        if wait_for_screen_update {
            self.wait_until_screen_is_not(prev_screen, None).await?;
            if wait_for_events_change {
                self.wait_for_screen_changes(prev_events, None).await?;
            }
        } else {
            sleep(DEFAULT_KEY_DELAY).await;
        }
        Ok(())
    }
}

// ============================================================================
// Session - Navigation
// ============================================================================

impl Session {
    /// Executes an action schedule, capturing one image per step.
    ///
    /// The screen as found is captured at `start_index`; each action then
    /// captures into the next index. Returns the final step index for
    /// chaining into a comparison pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the snapshot directories cannot be
    /// prepared, or the per-action endpoint and wait errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn navigate(
        &self,
        path: &Path,
        testcase: &str,
        schedule: &[NavAction],
        wait_for_screen_update: bool,
        take_snapshots: bool,
        start_index: usize,
        wait_for_events_change: bool,
    ) -> Result<usize> {
        let golden = golden_dir(path, testcase);
        let candidate = candidate_dir(path, testcase);
        if take_snapshots {
            fs::create_dir_all(&golden)?;
            fs::create_dir_all(&candidate)?;
        }

        let mut index = start_index;
        let filename = snapshot_target(&candidate, index, take_snapshots);
        debug!(testcase, steps = schedule.len(), start_index, "Navigate");
        self.snapshot(filename.as_deref()).await?;

        for action in schedule {
            index += 1;
            let filename = snapshot_target(&candidate, index, take_snapshots);
            self.run_action(
                *action,
                filename.as_deref(),
                wait_for_screen_update,
                wait_for_events_change,
            )
            .await?;
        }

        Ok(index)
    }

    /// Advances the UI until the event log matches `pattern`, capturing one
    /// image per step.
    ///
    /// The advance action is a right-click on button devices and the
    /// continue tap/swipe on touch devices. When found and
    /// `run_last_action` is set, the confirmation action is performed: a
    /// both-click, or the configured approve control on touch devices;
    /// the dynamic-tap variant aims at the center of the matched event's
    /// bounding box instead of the static table. Returns the final step
    /// index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] naming the awaited text when a step
    /// exceeds `options.timeout`, the recorded critical transport fault, or
    /// per-action errors.
    pub async fn navigate_until_text(
        &self,
        path: &Path,
        testcase: &str,
        pattern: &str,
        options: &TextSearchOptions,
    ) -> Result<usize> {
        let golden = golden_dir(path, testcase);
        let candidate = candidate_dir(path, testcase);
        if options.take_snapshots {
            fs::create_dir_all(&golden)?;
            fs::create_dir_all(&candidate)?;
        }

        let regex = Regex::new(&format!("(?i){pattern}"))
            .map_err(|e| Error::config(format!("invalid search pattern {pattern:?}: {e}")))?;

        let mut index = options.start_index;
        if options.wait_for_initial_events_change {
            self.wait_for_screen_changes(&self.initial_events, None)
                .await?;
        }
        let filename = snapshot_target(&candidate, index, options.take_snapshots);
        self.snapshot(filename.as_deref()).await?;

        let is_touch = self.options.model.is_touch();
        let mut step_started = Instant::now();
        let mut first_step = true;
        let matched_event;
        let last_filename;

        loop {
            if let Some(fault) = self.fault_recorder().critical_fault() {
                return Err(fault.into());
            }
            if step_started.elapsed() > options.timeout {
                return Err(Error::timeout(
                    format!("screen containing {pattern:?}"),
                    options.timeout.as_millis() as u64,
                ));
            }

            let events = self.events().await;
            index += 1;
            let filename = snapshot_target(&candidate, index, options.take_snapshots);

            if let Some(event) = events.iter().find(|e| regex.is_match(&e.text)) {
                matched_event = event.clone();
                last_filename = filename;
                break;
            }

            let action = self.advance_action(is_touch, first_step)?;
            self.run_action(
                action,
                filename.as_deref(),
                options.wait_for_screen_update,
                true,
            )
            .await?;
            first_step = false;
            // The bound applies per step, re-armed after every action.
            step_started = Instant::now();
        }

        if !options.run_last_action {
            return Ok(index);
        }

        let action = if is_touch {
            NavAction::Touch(self.approve_button(&matched_event)?)
        } else {
            NavAction::BothClick
        };
        self.run_action(
            action,
            last_filename.as_deref(),
            options.wait_for_screen_update,
            true,
        )
        .await?;
        Ok(index)
    }

    /// Picks the next advance action for a text search.
    fn advance_action(&self, is_touch: bool, first_step: bool) -> Result<NavAction> {
        if !is_touch {
            return Ok(NavAction::RightClick);
        }
        let kind = if first_step && self.options.blind_signing {
            // On blind-signing layouts the OCR'd warning text is
            // indistinguishable from the approve text, so the first advance
            // must be the reject tap. Firmware-layout dependency; revisit
            // once the ambiguity is fixed upstream.
            ButtonKind::RejectButton
        } else {
            ButtonKind::SwipeContinueButton
        };
        touch_element(self.options.model, kind)
            .ok_or_else(|| Error::config(format!("undefined touch action {kind:?}")))
            .map(NavAction::Touch)
    }

    /// Resolves the confirmation control, aiming dynamic taps at the
    /// matched event's bounding box.
    fn approve_button(&self, matched: &UiEvent) -> Result<TouchButton> {
        let kind = self.options.approve_action;
        let mut button = touch_element(self.options.model, kind)
            .ok_or_else(|| Error::config(format!("undefined touch action {kind:?}")))?;
        if kind == ButtonKind::DynamicTapButton {
            button.x = u32::try_from(matched.x + (matched.width as i32) / 2).unwrap_or(0);
            button.y = u32::try_from(matched.y + (matched.height as i32) / 2).unwrap_or(0);
        }
        Ok(button)
    }
}

// ============================================================================
// Session - Golden-set flows
// ============================================================================

impl Session {
    /// Compares the candidate images `0..=last_index` against the golden
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotMismatch`] naming the first diverging
    /// index.
    pub fn compare_snapshots(&self, path: &Path, testcase: &str, last_index: usize) -> Result<bool> {
        compare_snapshot_dirs(
            &golden_dir(path, testcase),
            &candidate_dir(path, testcase),
            last_index,
        )
    }

    /// Re-captures the image at `index` after the screen has settled.
    ///
    /// Used by the approve/reject flows to avoid committing a mid-animation
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotMismatch`] when the image to overwrite was
    /// never captured.
    pub async fn take_snapshot_and_overwrite(
        &self,
        path: &Path,
        testcase: &str,
        index: usize,
    ) -> Result<()> {
        let candidate = candidate_dir(path, testcase);
        fs::create_dir_all(&candidate)?;
        let filename = indexed_png(&candidate, index);
        fs::remove_file(&filename).map_err(|e| {
            Error::snapshot_mismatch(index, format!("snapshot to overwrite is missing: {e}"))
        })?;
        self.snapshot(Some(&filename)).await?;
        Ok(())
    }

    /// Runs an action schedule and compares the captured images against the
    /// golden set.
    ///
    /// # Errors
    ///
    /// Propagates navigation errors and the comparison result.
    pub async fn navigate_and_compare(
        &self,
        path: &Path,
        testcase: &str,
        schedule: &[NavAction],
        wait_for_screen_update: bool,
        start_index: usize,
    ) -> Result<bool> {
        let last_index = self
            .navigate(
                path,
                testcase,
                schedule,
                wait_for_screen_update,
                true,
                start_index,
                false,
            )
            .await?;
        self.compare_snapshots(path, testcase, last_index)
    }

    /// Advances until `pattern` appears, runs the confirmation action and
    /// compares the captured images against the golden set.
    ///
    /// # Errors
    ///
    /// Propagates search errors and the comparison result.
    pub async fn navigate_and_compare_until_text(
        &self,
        path: &Path,
        testcase: &str,
        pattern: &str,
        options: &TextSearchOptions,
    ) -> Result<bool> {
        let search = TextSearchOptions {
            take_snapshots: true,
            run_last_action: true,
            ..options.clone()
        };
        let last_index = self
            .navigate_until_text(path, testcase, pattern, &search)
            .await?;
        self.compare_snapshots(path, testcase, last_index)
    }

    /// Walks to the approval screen, confirms, and compares against the
    /// golden set.
    ///
    /// On touch devices the confirmation animation is nondeterministic: the
    /// flow waits for the main menu to return and re-captures the final
    /// image once the screen has settled.
    ///
    /// # Errors
    ///
    /// Propagates search, wait and comparison errors.
    pub async fn compare_snapshots_and_approve(
        &self,
        path: &Path,
        testcase: &str,
    ) -> Result<bool> {
        self.compare_snapshots_and_approve_with(path, testcase, &TextSearchOptions::default())
            .await
    }

    /// [`Session::compare_snapshots_and_approve`] with explicit options.
    ///
    /// # Errors
    ///
    /// Propagates search, wait and comparison errors.
    pub async fn compare_snapshots_and_approve_with(
        &self,
        path: &Path,
        testcase: &str,
        options: &TextSearchOptions,
    ) -> Result<bool> {
        let keyword = self.options.approve_keyword.clone();
        let search = TextSearchOptions {
            take_snapshots: true,
            run_last_action: true,
            ..options.clone()
        };
        let last_index = self
            .navigate_until_text(path, testcase, &keyword, &search)
            .await?;

        if self.options.model.is_touch() {
            self.wait_until_screen_is(&self.main_menu, None).await?;
            self.take_snapshot_and_overwrite(path, testcase, last_index)
                .await?;
        }
        self.compare_snapshots(path, testcase, last_index)
    }

    /// Walks to the rejection screen, rejects, and compares against the
    /// golden set.
    ///
    /// Touch devices confirm a rejection on a separate screen: the flow
    /// appends the reject and confirm-yes taps after the located screen,
    /// then re-captures the final image once the main menu has settled.
    ///
    /// # Errors
    ///
    /// Propagates search, wait and comparison errors.
    pub async fn compare_snapshots_and_reject(
        &self,
        path: &Path,
        testcase: &str,
    ) -> Result<bool> {
        self.compare_snapshots_and_reject_with(path, testcase, &TextSearchOptions::default())
            .await
    }

    /// [`Session::compare_snapshots_and_reject`] with explicit options.
    ///
    /// # Errors
    ///
    /// Propagates search, wait and comparison errors.
    pub async fn compare_snapshots_and_reject_with(
        &self,
        path: &Path,
        testcase: &str,
        options: &TextSearchOptions,
    ) -> Result<bool> {
        let keyword = self.options.reject_keyword.clone();

        if !self.options.model.is_touch() {
            return self
                .navigate_and_compare_until_text(path, testcase, &keyword, options)
                .await;
        }

        let search = TextSearchOptions {
            take_snapshots: true,
            run_last_action: false,
            ..options.clone()
        };
        let found_index = self
            .navigate_until_text(path, testcase, &keyword, &search)
            .await?;

        let confirm = TouchNavigation::new(
            self.options.model,
            &[ButtonKind::RejectButton, ButtonKind::ConfirmYesButton],
        )?;
        // navigate() starts by re-capturing the current screen, so back up
        // one index to overwrite the unwritten search image.
        let last_index = self
            .navigate(
                path,
                testcase,
                &confirm.schedule,
                options.wait_for_screen_update,
                true,
                found_index.saturating_sub(1),
                false,
            )
            .await?;

        self.wait_until_screen_is(&self.main_menu, None).await?;
        self.take_snapshot_and_overwrite(path, testcase, last_index)
            .await?;
        self.compare_snapshots(path, testcase, last_index)
    }

    /// Flips the expert-mode toggle through the settings screens.
    ///
    /// Returns the final step index.
    ///
    /// # Errors
    ///
    /// Propagates navigation errors.
    pub async fn toggle_expert_mode(
        &self,
        path: &Path,
        testcase: &str,
        take_snapshots: bool,
        start_index: usize,
    ) -> Result<usize> {
        let schedule = toggle_expert_mode_navigation(self.options.model, None)?;
        self.navigate(
            path,
            testcase,
            &schedule,
            true,
            take_snapshots,
            start_index,
            false,
        )
        .await
    }

    /// Enables one of the gated "special" settings modes.
    ///
    /// Button devices flip expert mode first, walk to `mode_text` (with the
    /// ten both-click unlock sequence for secret modes) and back out to the
    /// approval keyword; touch devices run the settings walk directly,
    /// using `touch_toggle` when the mode is not behind the default toggle.
    ///
    /// Returns the final step index.
    ///
    /// # Errors
    ///
    /// Propagates navigation and search errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn enable_special_mode(
        &self,
        path: &Path,
        testcase: &str,
        mode_text: &str,
        is_secret_mode: bool,
        touch_toggle: Option<ButtonKind>,
        take_snapshots: bool,
        start_index: usize,
        timeout: Duration,
    ) -> Result<usize> {
        if self.options.model.is_touch() {
            let schedule = special_mode_navigation(self.options.model, touch_toggle)?;
            return self
                .navigate(
                    path,
                    testcase,
                    &schedule,
                    true,
                    take_snapshots,
                    start_index,
                    false,
                )
                .await;
        }

        let expert_index = self
            .toggle_expert_mode(path, testcase, take_snapshots, start_index)
            .await?;

        let search = TextSearchOptions {
            take_snapshots,
            start_index: expert_index,
            timeout,
            run_last_action: !is_secret_mode,
            wait_for_initial_events_change: false,
            ..Default::default()
        };
        let mut index = self
            .navigate_until_text(path, testcase, mode_text, &search)
            .await?;

        if is_secret_mode {
            // Ten both-clicks unlock the hidden toggle; no screen update to
            // wait for between them.
            let unlock = vec![NavAction::BothClick; 10];
            index = self
                .navigate(path, testcase, &unlock, false, take_snapshots, index, false)
                .await?;
        }

        let keyword = self.options.approve_keyword.clone();
        let back_out = TextSearchOptions {
            take_snapshots,
            start_index: index,
            timeout,
            wait_for_initial_events_change: false,
            ..Default::default()
        };
        self.navigate_until_text(path, testcase, &keyword, &back_out)
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_convention() {
        let base = Path::new("/work/tests");
        assert_eq!(
            golden_dir(base, "sign_basic"),
            Path::new("/work/tests/snapshots/sign_basic")
        );
        assert_eq!(
            candidate_dir(base, "sign_basic"),
            Path::new("/work/tests/snapshots-tmp/sign_basic")
        );
    }

    #[test]
    fn test_snapshot_target_honors_toggle() {
        let dir = Path::new("/work");
        assert_eq!(
            snapshot_target(dir, 3, true),
            Some(PathBuf::from("/work/00003.png"))
        );
        assert_eq!(snapshot_target(dir, 3, false), None);
    }

    #[test]
    fn test_text_search_defaults() {
        let options = TextSearchOptions::default();
        assert!(options.wait_for_screen_update);
        assert!(options.take_snapshots);
        assert!(options.run_last_action);
        assert!(options.wait_for_initial_events_change);
        assert_eq!(options.start_index, 0);
        assert_eq!(options.timeout, DEFAULT_METHOD_TIMEOUT);
    }
}
