//! Touch coordinate tables for touch-panel devices.
//!
//! The UI of a touch device is driven by tapping (or swiping) fixed screen
//! regions. These tables are static configuration data per model and
//! firmware layout; the coordinates come straight from the device UIs and
//! change only when the firmware moves a control.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use super::model::DeviceModel;

// ============================================================================
// SwipeDirection
// ============================================================================

/// Direction of a finger swipe, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    /// Plain tap, no swipe.
    #[default]
    #[serde(rename = "none")]
    NoSwipe,
    /// Swipe towards the left edge.
    Left,
    /// Swipe towards the right edge.
    Right,
}

// ============================================================================
// TouchButton
// ============================================================================

/// A tappable screen region: coordinates, press duration and optional swipe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchButton {
    /// Horizontal tap coordinate.
    pub x: u32,
    /// Vertical tap coordinate.
    pub y: u32,
    /// Press duration in seconds (long-press buttons use several seconds).
    pub delay: f32,
    /// Swipe direction, when the control is swiped rather than tapped.
    pub direction: SwipeDirection,
}

impl TouchButton {
    /// Creates a plain tap button.
    #[must_use]
    pub const fn tap(x: u32, y: u32, delay: f32) -> Self {
        Self {
            x,
            y,
            delay,
            direction: SwipeDirection::NoSwipe,
        }
    }

    /// Creates a swiped control.
    #[must_use]
    pub const fn swipe(x: u32, y: u32, delay: f32, direction: SwipeDirection) -> Self {
        Self {
            x,
            y,
            delay,
            direction,
        }
    }
}

// ============================================================================
// ButtonKind
// ============================================================================

/// Logical controls of the touch UI, resolved per model through
/// [`touch_element`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonKind {
    /// Opens the application info page.
    InfoButton,
    /// Quits the application from the dashboard.
    QuitAppButton,
    /// Advances a review flow by one page.
    SwipeContinueButton,
    /// Returns to the previous page.
    PrevPageButton,
    /// Next page inside the settings screens.
    SettingsNavRightButton,
    /// Previous page inside the settings screens.
    SettingsNavLeftButton,
    /// Leaves the settings screens.
    SettingsQuitButton,
    /// First settings toggle.
    ToggleSettingButton1,
    /// Second settings toggle.
    ToggleSettingButton2,
    /// Third settings toggle.
    ToggleSettingButton3,
    /// Generic next-page control.
    NavRightButton,
    /// Generic previous-page control.
    NavLeftButton,
    /// Press-and-hold approval control.
    ApproveHoldButton,
    /// Single-tap approval control.
    ApproveTapButton,
    /// Rejection control on a review screen.
    RejectButton,
    /// Confirms a pending rejection.
    ConfirmYesButton,
    /// Cancels a pending rejection.
    ConfirmNoButton,
    /// Shows the address QR code.
    ShowQRButton,
    /// Closes the address QR code.
    CloseQRButton,
    /// Approval control whose coordinates are computed at runtime from the
    /// bounding box of the matched screen text rather than this table.
    DynamicTapButton,
}

// ============================================================================
// Per-model tables
// ============================================================================

mod stax {
    use super::{SwipeDirection, TouchButton};

    pub const INFO: TouchButton = TouchButton::tap(335, 65, 0.25);
    pub const QUIT_APP: TouchButton = TouchButton::tap(200, 625, 0.25);
    pub const SWIPE_CONTINUE: TouchButton =
        TouchButton::swipe(200, 350, 0.1, SwipeDirection::Left);
    pub const PREV_PAGE: TouchButton = TouchButton::tap(45, 45, 0.25);
    pub const SETTINGS_NAV_RIGHT: TouchButton = NAV_RIGHT;
    pub const SETTINGS_NAV_LEFT: TouchButton = TouchButton::tap(275, 625, 0.25);
    pub const SETTINGS_QUIT: TouchButton = TouchButton::tap(40, 45, 0.25);
    // From y:88 to y:227 (both included), the first switch is toggleable.
    pub const TOGGLE_1: TouchButton = TouchButton::tap(350, 88, 0.25);
    // From y:228 to y:367 (both included), the second switch is toggleable.
    pub const TOGGLE_2: TouchButton = TouchButton::tap(350, 228, 0.25);
    pub const TOGGLE_3: TouchButton = TouchButton::tap(350, 368, 0.25);
    pub const NAV_RIGHT: TouchButton = TouchButton::tap(360, 625, 0.25);
    pub const NAV_LEFT: TouchButton = TouchButton::tap(195, 625, 0.25);
    pub const APPROVE_HOLD: TouchButton = TouchButton::tap(335, 520, 5.0);
    pub const APPROVE_TAP: TouchButton = TouchButton::tap(205, 520, 0.25);
    pub const REJECT: TouchButton = TouchButton::tap(75, 625, 0.25);
    pub const CONFIRM_YES: TouchButton = TouchButton::tap(200, 550, 0.25);
    pub const CONFIRM_NO: TouchButton = TouchButton::tap(200, 630, 0.25);
    pub const SHOW_QR: TouchButton = TouchButton::tap(200, 300, 0.25);
    pub const CLOSE_QR: TouchButton = TouchButton::tap(200, 650, 0.25);
}

mod flex {
    use super::{SwipeDirection, TouchButton};

    pub const INFO: TouchButton = TouchButton::tap(405, 75, 0.25);
    pub const QUIT_APP: TouchButton = TouchButton::tap(240, 550, 0.25);
    pub const SWIPE_CONTINUE: TouchButton =
        TouchButton::swipe(250, 325, 0.1, SwipeDirection::Left);
    pub const PREV_PAGE: TouchButton = TouchButton::tap(45, 45, 0.25);
    pub const SETTINGS_NAV_RIGHT: TouchButton = NAV_RIGHT;
    pub const SETTINGS_NAV_LEFT: TouchButton = TouchButton::tap(315, 555, 0.25);
    pub const SETTINGS_QUIT: TouchButton = TouchButton::tap(40, 45, 0.25);
    // From y:96 to y:235 (both included), the first switch is toggleable.
    pub const TOGGLE_1: TouchButton = TouchButton::tap(415, 96, 0.25);
    // From y:236 to y:375 (both included), the second switch is toggleable.
    pub const TOGGLE_2: TouchButton = TouchButton::tap(350, 236, 0.25);
    pub const NAV_RIGHT: TouchButton = TouchButton::tap(435, 555, 0.25);
    pub const NAV_LEFT: TouchButton = TouchButton::tap(235, 555, 0.25);
    pub const APPROVE_HOLD: TouchButton = TouchButton::tap(400, 435, 5.0);
    pub const APPROVE_TAP: TouchButton = TouchButton::tap(240, 435, 0.25);
    pub const REJECT: TouchButton = TouchButton::tap(95, 555, 0.25);
    pub const CONFIRM_YES: TouchButton = TouchButton::tap(235, 460, 0.25);
    pub const CONFIRM_NO: TouchButton = TouchButton::tap(235, 555, 0.25);
    pub const SHOW_QR: TouchButton = TouchButton::tap(250, 245, 0.25);
    pub const CLOSE_QR: TouchButton = TouchButton::tap(200, 650, 0.25);
}

// ============================================================================
// Lookup
// ============================================================================

/// Resolves a logical control to its coordinates on the given model.
///
/// Returns `None` for button-only devices, for controls a model does not
/// have (flex has two settings toggles, not three), and the placeholder
/// coordinates of [`ButtonKind::DynamicTapButton`] resolve to the plain
/// approve-tap region (callers override them from the matched event).
#[must_use]
pub fn touch_element(model: DeviceModel, kind: ButtonKind) -> Option<TouchButton> {
    match model {
        DeviceModel::Stax => Some(match kind {
            ButtonKind::InfoButton => stax::INFO,
            ButtonKind::QuitAppButton => stax::QUIT_APP,
            ButtonKind::SwipeContinueButton => stax::SWIPE_CONTINUE,
            ButtonKind::PrevPageButton => stax::PREV_PAGE,
            ButtonKind::SettingsNavRightButton => stax::SETTINGS_NAV_RIGHT,
            ButtonKind::SettingsNavLeftButton => stax::SETTINGS_NAV_LEFT,
            ButtonKind::SettingsQuitButton => stax::SETTINGS_QUIT,
            ButtonKind::ToggleSettingButton1 => stax::TOGGLE_1,
            ButtonKind::ToggleSettingButton2 => stax::TOGGLE_2,
            ButtonKind::ToggleSettingButton3 => stax::TOGGLE_3,
            ButtonKind::NavRightButton => stax::NAV_RIGHT,
            ButtonKind::NavLeftButton => stax::NAV_LEFT,
            ButtonKind::ApproveHoldButton => stax::APPROVE_HOLD,
            ButtonKind::ApproveTapButton | ButtonKind::DynamicTapButton => stax::APPROVE_TAP,
            ButtonKind::RejectButton => stax::REJECT,
            ButtonKind::ConfirmYesButton => stax::CONFIRM_YES,
            ButtonKind::ConfirmNoButton => stax::CONFIRM_NO,
            ButtonKind::ShowQRButton => stax::SHOW_QR,
            ButtonKind::CloseQRButton => stax::CLOSE_QR,
        }),
        DeviceModel::Flex => match kind {
            ButtonKind::InfoButton => Some(flex::INFO),
            ButtonKind::QuitAppButton => Some(flex::QUIT_APP),
            ButtonKind::SwipeContinueButton => Some(flex::SWIPE_CONTINUE),
            ButtonKind::PrevPageButton => Some(flex::PREV_PAGE),
            ButtonKind::SettingsNavRightButton => Some(flex::SETTINGS_NAV_RIGHT),
            ButtonKind::SettingsNavLeftButton => Some(flex::SETTINGS_NAV_LEFT),
            ButtonKind::SettingsQuitButton => Some(flex::SETTINGS_QUIT),
            ButtonKind::ToggleSettingButton1 => Some(flex::TOGGLE_1),
            ButtonKind::ToggleSettingButton2 => Some(flex::TOGGLE_2),
            ButtonKind::ToggleSettingButton3 => None,
            ButtonKind::NavRightButton => Some(flex::NAV_RIGHT),
            ButtonKind::NavLeftButton => Some(flex::NAV_LEFT),
            ButtonKind::ApproveHoldButton => Some(flex::APPROVE_HOLD),
            ButtonKind::ApproveTapButton | ButtonKind::DynamicTapButton => {
                Some(flex::APPROVE_TAP)
            }
            ButtonKind::RejectButton => Some(flex::REJECT),
            ButtonKind::ConfirmYesButton => Some(flex::CONFIRM_YES),
            ButtonKind::ConfirmNoButton => Some(flex::CONFIRM_NO),
            ButtonKind::ShowQRButton => Some(flex::SHOW_QR),
            ButtonKind::CloseQRButton => Some(flex::CLOSE_QR),
        },
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_devices_have_no_touch_elements() {
        assert!(touch_element(DeviceModel::Nanos, ButtonKind::InfoButton).is_none());
        assert!(touch_element(DeviceModel::Nanox, ButtonKind::ApproveHoldButton).is_none());
    }

    #[test]
    fn test_stax_lookup() {
        let b = touch_element(DeviceModel::Stax, ButtonKind::ApproveHoldButton).unwrap();
        assert_eq!((b.x, b.y), (335, 520));
        assert!((b.delay - 5.0).abs() < f32::EPSILON);
        assert_eq!(b.direction, SwipeDirection::NoSwipe);
    }

    #[test]
    fn test_flex_continue_is_a_swipe() {
        let b = touch_element(DeviceModel::Flex, ButtonKind::SwipeContinueButton).unwrap();
        assert_eq!(b.direction, SwipeDirection::Left);
    }

    #[test]
    fn test_flex_has_two_toggles() {
        assert!(touch_element(DeviceModel::Flex, ButtonKind::ToggleSettingButton2).is_some());
        assert!(touch_element(DeviceModel::Flex, ButtonKind::ToggleSettingButton3).is_none());
    }

    #[test]
    fn test_dynamic_tap_has_placeholder_coordinates() {
        let dynamic = touch_element(DeviceModel::Stax, ButtonKind::DynamicTapButton).unwrap();
        let tap = touch_element(DeviceModel::Stax, ButtonKind::ApproveTapButton).unwrap();
        assert_eq!(dynamic, tap);
    }
}
