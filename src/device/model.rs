//! Device model catalog.
//!
//! Each model fixes the screen geometry, the input class (two physical
//! buttons vs. a touch panel), the default UI keywords used by the
//! orchestration defaults, and the ELF entry-point word used to sanity-check
//! application binaries before launch.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// ScreenRect
// ============================================================================

/// Screen geometry of a device model, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRect {
    /// Screen width.
    pub width: u32,
    /// Screen height.
    pub height: u32,
}

// ============================================================================
// DeviceModel
// ============================================================================

/// Supported device models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    /// First-generation two-button device, 128x32 screen.
    Nanos,
    /// Two-button device, 128x64 screen.
    Nanosp,
    /// Two-button device, 128x64 screen.
    Nanox,
    /// Touch device, 400x672 screen.
    Stax,
    /// Touch device with swipe navigation, 480x600 screen.
    Flex,
}

/// All models, in pool port-range order.
pub const ALL_MODELS: [DeviceModel; 5] = [
    DeviceModel::Nanos,
    DeviceModel::Nanosp,
    DeviceModel::Nanox,
    DeviceModel::Stax,
    DeviceModel::Flex,
];

impl DeviceModel {
    /// Returns the model name as used on command lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nanos => "nanos",
            Self::Nanosp => "nanosp",
            Self::Nanox => "nanox",
            Self::Stax => "stax",
            Self::Flex => "flex",
        }
    }

    /// Returns the screen geometry for this model.
    #[must_use]
    pub const fn screen(self) -> ScreenRect {
        match self {
            Self::Nanos => ScreenRect {
                width: 128,
                height: 32,
            },
            Self::Nanosp | Self::Nanox => ScreenRect {
                width: 128,
                height: 64,
            },
            Self::Stax => ScreenRect {
                width: 400,
                height: 672,
            },
            Self::Flex => ScreenRect {
                width: 480,
                height: 600,
            },
        }
    }

    /// Returns `true` for touch-panel devices.
    #[inline]
    #[must_use]
    pub const fn is_touch(self) -> bool {
        matches!(self, Self::Stax | Self::Flex)
    }

    /// Returns the text shown when an application has booted to its
    /// main screen.
    #[must_use]
    pub const fn default_start_text(self) -> &'static str {
        if self.is_touch() {
            "This application enables"
        } else {
            "Ready"
        }
    }

    /// Returns the keyword locating the approval screen.
    #[must_use]
    pub const fn default_approve_keyword(self) -> &'static str {
        if self.is_touch() { "Hold to sign" } else { "APPROVE" }
    }

    /// Returns the keyword locating the rejection screen.
    #[must_use]
    pub const fn default_reject_keyword(self) -> &'static str {
        if self.is_touch() { "Cancel" } else { "REJECT" }
    }

    /// Returns the expected ELF entry-point word for applications built
    /// for this model.
    #[must_use]
    pub const fn elf_entry(self) -> u32 {
        match self {
            Self::Nanos => 0xc0d0_0001,
            _ => 0xc0de_0001,
        }
    }

    /// Returns this model's index into the statically partitioned pool
    /// port ranges.
    #[must_use]
    pub(crate) const fn port_range_index(self) -> u16 {
        match self {
            Self::Nanos => 0,
            Self::Nanox => 1,
            Self::Nanosp => 2,
            Self::Stax => 3,
            Self::Flex => 4,
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nanos" => Ok(Self::Nanos),
            "nanosp" => Ok(Self::Nanosp),
            "nanox" => Ok(Self::Nanox),
            "stax" => Ok(Self::Stax),
            "flex" => Ok(Self::Flex),
            other => Err(Error::config(format!("model {other} not recognized"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_dimensions() {
        assert_eq!(DeviceModel::Nanos.screen().width, 128);
        assert_eq!(DeviceModel::Nanos.screen().height, 32);
        assert_eq!(DeviceModel::Nanox.screen().height, 64);
        assert_eq!(DeviceModel::Stax.screen().width, 400);
        assert_eq!(DeviceModel::Flex.screen().width, 480);
    }

    #[test]
    fn test_touch_predicate() {
        assert!(DeviceModel::Stax.is_touch());
        assert!(DeviceModel::Flex.is_touch());
        assert!(!DeviceModel::Nanos.is_touch());
        assert!(!DeviceModel::Nanosp.is_touch());
    }

    #[test]
    fn test_defaults_split_by_device_class() {
        assert_eq!(DeviceModel::Nanos.default_approve_keyword(), "APPROVE");
        assert_eq!(DeviceModel::Stax.default_approve_keyword(), "Hold to sign");
        assert_eq!(DeviceModel::Nanox.default_start_text(), "Ready");
    }

    #[test]
    fn test_from_str_round_trip() {
        for model in ALL_MODELS {
            assert_eq!(model.as_str().parse::<DeviceModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("nano".parse::<DeviceModel>().is_err());
    }

    #[test]
    fn test_elf_entry_words() {
        assert_eq!(DeviceModel::Nanos.elf_entry(), 0xc0d0_0001);
        assert_eq!(DeviceModel::Stax.elf_entry(), 0xc0de_0001);
    }

    #[test]
    fn test_port_range_indices_are_distinct() {
        let mut seen = [false; 5];
        for model in ALL_MODELS {
            let idx = model.port_range_index() as usize;
            assert!(!seen[idx]);
            seen[idx] = true;
        }
    }
}
