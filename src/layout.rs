//! Binary layout of the GameLink shared-memory record (protocol revision 4)
//!
//! The host creates one byte-packed record and the controller maps it. The
//! structs below exist to pin the layout down: they are never instantiated
//! by this crate, only measured with `size_of` and `offset_of!`. Every field
//! access goes through [`crate::region::LinkRegion`] using the offsets
//! exported here.
//!
//! ```text
//! +-----------------------+ 0
//! | version, flags        |
//! | system[64]            |
//! | program[260]          |
//! | program_hash[4]       |
//! +-----------------------+ FRAME
//! | frame (5 MiB pixels)  |
//! +-----------------------+ INPUT
//! | input (primary)       |
//! | peek                  |
//! | buf_tohost (64 KiB)   |
//! | buf_recv (64 KiB)     |
//! | audio                 |
//! | ram_size              |
//! | input_other           |
//! +-----------------------+ LINK_RECORD_SIZE
//! | RAM window            |  ram_size bytes
//! +-----------------------+
//! ```
//!
//! New fields must be appended to [`SharedMemoryMap`], never inserted.

use std::mem::{offset_of, size_of};

/// Protocol revision written by the host into the header's version byte.
pub const PROTOCOL_VERSION: u8 = 4;

/// Well-known name of the host's file mapping for this revision.
pub const MAPPING_NAME: &str = "DWD_GAMELINK_MMAP_R4";

/// Well-known name of the host's companion mutex for this revision.
pub const LOCK_NAME: &str = "DWD_GAMELINK_MUTEX_R4";

/// Capacity of the system-name field.
pub const SYSTEM_MAXLEN: usize = 64;
/// Capacity of the program-name field (null-terminated).
pub const PROGRAM_MAXLEN: usize = 260;
/// Number of 32-bit words in the program hash.
pub const PROGRAM_HASH_WORDS: usize = 4;

/// Maximum frame width in pixels.
pub const MAX_WIDTH: usize = 1280;
/// Maximum frame height in pixels.
pub const MAX_HEIGHT: usize = 1024;
/// Bytes per pixel (32-bit 0xAARRGGBB).
pub const BYTES_PER_PIXEL: usize = 4;
/// Capacity of the frame pixel buffer.
pub const MAX_FRAME_PAYLOAD: usize = MAX_WIDTH * MAX_HEIGHT * BYTES_PER_PIXEL;

/// Capacity of each general-purpose buffer.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Capacity of the peek address and result arrays.
pub const PEEK_LIMIT: usize = 16 * 1024;
/// Peek address requesting the program counter's high byte.
pub const PEEK_SPECIAL_PC_H: u32 = u32::MAX - 1;
/// Peek address requesting the program counter's low byte.
pub const PEEK_SPECIAL_PC_L: u32 = u32::MAX - 2;

/// Number of 32-bit words in the keyboard bitmap.
pub const KEYBOARD_WORDS: usize = 8;
/// Number of addressable scancodes.
pub const KEYBOARD_KEYS: usize = KEYBOARD_WORDS * 32;

/// Upper bound accepted for the audio volume bytes.
pub const MAX_VOLUME: u8 = 100;

/// Header flag bits.
pub mod flags {
    /// Host wants keyboard input.
    pub const WANT_KEYBOARD: u8 = 1 << 0;
    /// Host wants mouse input.
    pub const WANT_MOUSE: u8 = 1 << 1;
    /// Host is publishing no frames (tracking only).
    pub const NO_FRAME: u8 = 1 << 2;
    /// Emulation is paused.
    pub const PAUSED: u8 = 1 << 3;
}

/// Input "ready" marker values.
pub mod ready {
    /// No input pending.
    pub const NONE: u8 = 0;
    /// Input written by the primary source.
    pub const PRIMARY: u8 = 1;
    /// Input written by a secondary application (this controller).
    pub const OTHER: u8 = 17;
}

/// Frame image format: nothing published yet.
pub const IMAGE_FORMAT_NONE: u8 = 0;
/// Frame image format: 32-bit 0xAARRGGBB.
pub const IMAGE_FORMAT_ARGB32: u8 = 1;

/// Host -> controller frame.
#[repr(C, packed)]
pub struct FrameRecord {
    pub seq: u16,
    pub width: u16,
    pub height: u16,
    pub image_fmt: u8,
    pub reserved0: u8,
    pub par_x: u16,
    pub par_y: u16,
    pub buffer: [u8; MAX_FRAME_PAYLOAD],
}

/// Controller -> host input.
#[repr(C, packed)]
pub struct InputRecord {
    pub mouse_dx: f32,
    pub mouse_dy: f32,
    pub ready: u8,
    pub mouse_btn: u8,
    pub keyb_state: [u32; KEYBOARD_WORDS],
}

/// Register and memory inspection requests.
#[repr(C, packed)]
pub struct PeekRecord {
    pub addr_count: u32,
    pub addr: [u32; PEEK_LIMIT],
    pub data: [u8; PEEK_LIMIT],
}

/// General 64 KiB byte channel.
#[repr(C, packed)]
pub struct BufferRecord {
    pub payload: u16,
    pub data: [u8; BUFFER_SIZE],
}

/// Audio control block.
#[repr(C, packed)]
pub struct AudioRecord {
    pub master_vol_l: u8,
    pub master_vol_r: u8,
}

/// Top-level record. The RAM window follows it directly.
#[repr(C, packed)]
pub struct SharedMemoryMap {
    pub version: u8,
    pub flags: u8,
    pub system: [u8; SYSTEM_MAXLEN],
    pub program: [u8; PROGRAM_MAXLEN],
    pub program_hash: [u32; PROGRAM_HASH_WORDS],

    pub frame: FrameRecord,
    pub input: InputRecord,
    pub peek: PeekRecord,
    pub buf_tohost: BufferRecord,
    pub buf_recv: BufferRecord,
    pub audio: AudioRecord,

    // protocol v4
    pub ram_size: u32,
    pub input_other: InputRecord,
}

/// Size of the fixed record; the RAM window starts at this offset.
pub const LINK_RECORD_SIZE: usize = 5_456_324;

const _: () = assert!(size_of::<FrameRecord>() == 12 + MAX_FRAME_PAYLOAD);
const _: () = assert!(size_of::<InputRecord>() == 42);
const _: () = assert!(size_of::<PeekRecord>() == 4 + PEEK_LIMIT * 4 + PEEK_LIMIT);
const _: () = assert!(size_of::<BufferRecord>() == 2 + BUFFER_SIZE);
const _: () = assert!(size_of::<AudioRecord>() == 2);
const _: () = assert!(size_of::<SharedMemoryMap>() == LINK_RECORD_SIZE);

/// Absolute byte offsets of every field the controller touches.
pub mod offsets {
    use super::{
        AudioRecord, BufferRecord, FrameRecord, InputRecord, PeekRecord, SharedMemoryMap,
    };
    use std::mem::offset_of;

    pub const VERSION: usize = offset_of!(SharedMemoryMap, version);
    pub const FLAGS: usize = offset_of!(SharedMemoryMap, flags);
    pub const SYSTEM: usize = offset_of!(SharedMemoryMap, system);
    pub const PROGRAM: usize = offset_of!(SharedMemoryMap, program);
    pub const PROGRAM_HASH: usize = offset_of!(SharedMemoryMap, program_hash);
    pub const RAM_SIZE: usize = offset_of!(SharedMemoryMap, ram_size);

    const FRAME: usize = offset_of!(SharedMemoryMap, frame);
    pub const FRAME_SEQ: usize = FRAME + offset_of!(FrameRecord, seq);
    pub const FRAME_WIDTH: usize = FRAME + offset_of!(FrameRecord, width);
    pub const FRAME_HEIGHT: usize = FRAME + offset_of!(FrameRecord, height);
    pub const FRAME_FORMAT: usize = FRAME + offset_of!(FrameRecord, image_fmt);
    pub const FRAME_PAR_X: usize = FRAME + offset_of!(FrameRecord, par_x);
    pub const FRAME_PAR_Y: usize = FRAME + offset_of!(FrameRecord, par_y);
    pub const FRAME_BUFFER: usize = FRAME + offset_of!(FrameRecord, buffer);

    /// Field offsets of one input region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputOffsets {
        pub mouse_dx: usize,
        pub mouse_dy: usize,
        pub ready: usize,
        pub mouse_btn: usize,
        pub keyb_state: usize,
    }

    const fn input_at(base: usize) -> InputOffsets {
        InputOffsets {
            mouse_dx: base + offset_of!(InputRecord, mouse_dx),
            mouse_dy: base + offset_of!(InputRecord, mouse_dy),
            ready: base + offset_of!(InputRecord, ready),
            mouse_btn: base + offset_of!(InputRecord, mouse_btn),
            keyb_state: base + offset_of!(InputRecord, keyb_state),
        }
    }

    pub const INPUT: InputOffsets = input_at(offset_of!(SharedMemoryMap, input));
    pub const INPUT_OTHER: InputOffsets = input_at(offset_of!(SharedMemoryMap, input_other));

    const PEEK: usize = offset_of!(SharedMemoryMap, peek);
    pub const PEEK_COUNT: usize = PEEK + offset_of!(PeekRecord, addr_count);
    pub const PEEK_ADDR: usize = PEEK + offset_of!(PeekRecord, addr);
    pub const PEEK_DATA: usize = PEEK + offset_of!(PeekRecord, data);

    /// Field offsets of one buffer region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferOffsets {
        pub payload: usize,
        pub data: usize,
    }

    const fn buffer_at(base: usize) -> BufferOffsets {
        BufferOffsets {
            payload: base + offset_of!(BufferRecord, payload),
            data: base + offset_of!(BufferRecord, data),
        }
    }

    pub const BUF_TOHOST: BufferOffsets = buffer_at(offset_of!(SharedMemoryMap, buf_tohost));
    pub const BUF_RECV: BufferOffsets = buffer_at(offset_of!(SharedMemoryMap, buf_recv));

    const AUDIO: usize = offset_of!(SharedMemoryMap, audio);
    pub const AUDIO_VOL_L: usize = AUDIO + offset_of!(AudioRecord, master_vol_l);
    pub const AUDIO_VOL_R: usize = AUDIO + offset_of!(AudioRecord, master_vol_r);
}

/// Offset of the RAM window inside the mapping.
pub const RAM_BASE_OFFSET: usize = LINK_RECORD_SIZE;

const _: () = assert!(offset_of!(SharedMemoryMap, input_other) + size_of::<InputRecord>() == RAM_BASE_OFFSET);
