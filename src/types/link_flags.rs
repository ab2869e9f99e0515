//! Header flag bitmask

use serde::{Deserialize, Serialize};

use crate::layout::flags;

/// The host's header flag byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct LinkFlags(pub u8);

impl LinkFlags {
    /// Create from the raw header byte.
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Check if a specific bit is set.
    pub fn is_set(&self, bit: u32) -> bool {
        bit < 8 && (self.0 & (1 << bit)) != 0
    }

    /// Check if a flag is set using a bitmask.
    pub fn has_flag(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn wants_keyboard(&self) -> bool {
        self.has_flag(flags::WANT_KEYBOARD)
    }

    pub fn wants_mouse(&self) -> bool {
        self.has_flag(flags::WANT_MOUSE)
    }

    /// Host is running without publishing frames.
    pub fn is_tracking_only(&self) -> bool {
        self.has_flag(flags::NO_FRAME)
    }

    pub fn is_paused(&self) -> bool {
        self.has_flag(flags::PAUSED)
    }
}

/// Compare frame sequence numbers in u16 space with wraparound using the
/// half-range rule. Returns true if `a` is considered newer than `b`.
pub fn sequence_after(a: u16, b: u16) -> bool {
    if a == b {
        return false;
    }
    a.wrapping_sub(b) < 0x8000
}
