//! Input channel
//!
//! The controller writes its input into the secondary input region so it
//! never clobbers the primary source. Each write sets that region's ready
//! marker to [`ready::OTHER`] so the host can tell the two apart.

use crate::layout::offsets::InputOffsets;
use crate::layout::{KEYBOARD_KEYS, KEYBOARD_WORDS, ready};
use crate::region::LinkRegion;
use crate::{LinkError, Result};

/// Word index and bit mask of `scancode` in the keyboard bitmap.
pub fn scancode_bit(scancode: u32) -> Result<(usize, u32)> {
    if scancode as usize >= KEYBOARD_KEYS {
        return Err(LinkError::ScancodeOutOfRange { scancode });
    }
    Ok(((scancode / 32) as usize, 1 << (scancode % 32)))
}

/// Snapshot of a 256-key bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardBitmap(pub [u32; KEYBOARD_WORDS]);

impl KeyboardBitmap {
    pub fn read(region: &LinkRegion, input: &InputOffsets) -> Self {
        Self(std::array::from_fn(|i| region.read_u32(input.keyb_state + i * 4)))
    }

    pub fn is_pressed(&self, scancode: u32) -> bool {
        scancode_bit(scancode).is_ok_and(|(word, mask)| self.0[word] & mask != 0)
    }

    /// Scancodes currently down, ascending.
    pub fn pressed(&self) -> impl Iterator<Item = u32> + '_ {
        (0..KEYBOARD_KEYS as u32).filter(|&code| self.is_pressed(code))
    }
}

/// Set or clear one key in `input`'s bitmap and mark the region ready.
///
/// Callers hold the link lock.
pub fn write_keystroke(
    region: &LinkRegion,
    input: &InputOffsets,
    scancode: u32,
    pressed: bool,
) -> Result<()> {
    let (word, mask) = scancode_bit(scancode)?;
    let offset = input.keyb_state + word * 4;
    let current = region.read_u32(offset);
    let next = if pressed { current | mask } else { current & !mask };

    region.write_u8(input.ready, ready::OTHER);
    region.write_u32(offset, next);
    Ok(())
}

/// Publish a relative mouse movement.
pub fn write_mouse_delta(region: &LinkRegion, input: &InputOffsets, dx: f32, dy: f32) {
    region.write_f32(input.mouse_dx, dx);
    region.write_f32(input.mouse_dy, dy);
    region.write_u8(input.ready, ready::OTHER);
}

/// Publish the mouse button mask.
pub fn write_mouse_buttons(region: &LinkRegion, input: &InputOffsets, buttons: u8) {
    region.write_u8(input.mouse_btn, buttons);
    region.write_u8(input.ready, ready::OTHER);
}
