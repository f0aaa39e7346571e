//! Navigation actions and schedules.
//!
//! A UI walk is an ordered list of [`NavAction`]s. Button devices are
//! driven by click schedules written as signed integers (`0` = both
//! buttons, `n > 0` = n right clicks, `n < 0` = n left clicks); touch
//! devices are driven by [`ButtonKind`] sequences resolved against the
//! per-model coordinate tables.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

use super::buttons::{ButtonKind, TouchButton, touch_element};
use super::model::DeviceModel;

// ============================================================================
// NavAction
// ============================================================================

/// One input action against the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavAction {
    /// Press and release the left button.
    LeftClick,
    /// Press and release the right button.
    RightClick,
    /// Press and release both buttons together.
    BothClick,
    /// Tap or swipe the touch panel at the given region.
    Touch(TouchButton),
}

// ============================================================================
// Click schedules
// ============================================================================

/// Expands a numeric click schedule into actions.
///
/// `0` becomes a both-click; positive numbers expand to that many right
/// clicks; negative numbers to that many left clicks.
#[must_use]
pub fn schedule_to_actions(schedule: &[i32]) -> Vec<NavAction> {
    let mut actions = Vec::new();
    for &step in schedule {
        if step == 0 {
            actions.push(NavAction::BothClick);
            continue;
        }
        let action = if step > 0 {
            NavAction::RightClick
        } else {
            NavAction::LeftClick
        };
        for _ in 0..step.unsigned_abs() {
            actions.push(action);
        }
    }
    actions
}

/// A click schedule for button devices.
#[derive(Debug, Clone)]
pub struct ClickNavigation {
    /// The expanded action schedule.
    pub schedule: Vec<NavAction>,
}

impl ClickNavigation {
    /// Expands a numeric click schedule.
    #[must_use]
    pub fn new(clicks: &[i32]) -> Self {
        Self {
            schedule: schedule_to_actions(clicks),
        }
    }
}

/// A touch schedule resolved against a model's coordinate table.
#[derive(Debug, Clone)]
pub struct TouchNavigation {
    /// The resolved action schedule.
    pub schedule: Vec<NavAction>,
}

impl TouchNavigation {
    /// Resolves a sequence of logical controls for the given model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the model has no coordinates for one
    /// of the requested controls.
    pub fn new(model: DeviceModel, kinds: &[ButtonKind]) -> Result<Self> {
        let mut schedule = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let button = touch_element(model, kind).ok_or_else(|| {
                Error::config(format!("undefined touch action {kind:?} on {model}"))
            })?;
            schedule.push(NavAction::Touch(button));
        }
        Ok(Self { schedule })
    }
}

// ============================================================================
// Stock walks
// ============================================================================

/// Main-menu round trip: enter the info/settings screens, flip the first
/// toggle twice and leave everything as found.
///
/// # Errors
///
/// Returns [`Error::Config`] when a touch control is missing for the model.
pub fn main_menu_navigation(model: DeviceModel, clicks: Option<&[i32]>) -> Result<Vec<NavAction>> {
    if model.is_touch() {
        return Ok(TouchNavigation::new(
            model,
            &[
                ButtonKind::InfoButton,
                ButtonKind::NavRightButton,
                ButtonKind::ToggleSettingButton1,
                ButtonKind::ToggleSettingButton1,
                ButtonKind::SettingsQuitButton,
            ],
        )?
        .schedule);
    }
    const DEFAULT_MAINMENU_CLICKS: [i32; 5] = [1, 0, 0, 4, -5];
    Ok(ClickNavigation::new(clicks.unwrap_or(&DEFAULT_MAINMENU_CLICKS)).schedule)
}

/// Walk that flips the expert-mode toggle in the settings screens.
///
/// # Errors
///
/// Returns [`Error::Config`] when a touch control is missing for the model.
pub fn toggle_expert_mode_navigation(
    model: DeviceModel,
    clicks: Option<&[i32]>,
) -> Result<Vec<NavAction>> {
    if model.is_touch() {
        return Ok(TouchNavigation::new(
            model,
            &[
                ButtonKind::InfoButton,
                ButtonKind::NavRightButton,
                ButtonKind::ToggleSettingButton1,
                ButtonKind::SettingsQuitButton,
            ],
        )?
        .schedule);
    }
    const DEFAULT_EXPERT_MODE_CLICKS: [i32; 3] = [1, 0, -1];
    Ok(ClickNavigation::new(clicks.unwrap_or(&DEFAULT_EXPERT_MODE_CLICKS)).schedule)
}

/// Walk that enables one of the gated "special" settings toggles on a touch
/// device, confirming the warning screen at the end.
///
/// # Errors
///
/// Returns [`Error::Config`] for button devices (they use click schedules
/// through the expert-mode path) or when a control is missing.
pub fn special_mode_navigation(
    model: DeviceModel,
    toggle: Option<ButtonKind>,
) -> Result<Vec<NavAction>> {
    if !model.is_touch() {
        return Err(Error::config(
            "special-mode walk is only defined for touch devices",
        ));
    }
    Ok(TouchNavigation::new(
        model,
        &[
            ButtonKind::InfoButton,
            ButtonKind::NavRightButton,
            ButtonKind::ToggleSettingButton1,
            ButtonKind::NavLeftButton,
            ButtonKind::NavRightButton,
            toggle.unwrap_or(ButtonKind::ToggleSettingButton2),
            ButtonKind::SwipeContinueButton,
            ButtonKind::ConfirmYesButton,
        ],
    )?
    .schedule)
}

// ============================================================================
// Tests
// ============================================================================
