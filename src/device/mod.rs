//! Device models, input actions and touch coordinate tables.
//!
//! Everything in this module is static configuration: which models exist,
//! how big their screens are, where their touch controls live and how a
//! UI walk is written down.

/// Navigation actions and schedule expansion.
pub mod actions;

/// Touch coordinate tables.
pub mod buttons;

/// Device model catalog.
pub mod model;

pub use actions::{
    ClickNavigation, NavAction, TouchNavigation, main_menu_navigation, schedule_to_actions,
    special_mode_navigation, toggle_expert_mode_navigation,
};
pub use buttons::{ButtonKind, SwipeDirection, TouchButton, touch_element};
pub use model::{ALL_MODELS, DeviceModel, ScreenRect};
