//! Host -> controller readers
//!
//! Frame metadata, the peek channel and the RAM window are read without the
//! link lock. The host rewrites them continuously, so any value here may be
//! torn; the next sequence number supersedes it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::layout::{
    BYTES_PER_PIXEL, IMAGE_FORMAT_NONE, LINK_RECORD_SIZE, MAX_FRAME_PAYLOAD, PEEK_LIMIT,
    PEEK_SPECIAL_PC_H, PEEK_SPECIAL_PC_L, PROGRAM_HASH_WORDS, PROGRAM_MAXLEN, RAM_BASE_OFFSET,
    SYSTEM_MAXLEN, offsets,
};
use crate::region::LinkRegion;
use crate::types::LinkFlags;

/// Bytes of pixel data described by a frame header.
///
/// Zero when no frame is published, whatever the dimensions say.
pub fn frame_buffer_length(width: u16, height: u16, format: u8) -> usize {
    if format == IMAGE_FORMAT_NONE {
        return 0;
    }
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Metadata of the most recent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct FrameInfo {
    pub seq: u16,
    pub width: u16,
    pub height: u16,
    pub format: u8,
    pub par_x: u16,
    pub par_y: u16,
    pub buffer_length: usize,
    pub wants_mouse: bool,
}

impl FrameInfo {
    /// Read the frame header.
    pub fn read(region: &LinkRegion) -> Self {
        let width = region.read_u16(offsets::FRAME_WIDTH);
        let height = region.read_u16(offsets::FRAME_HEIGHT);
        let format = region.read_u8(offsets::FRAME_FORMAT);
        Self {
            seq: region.read_u16(offsets::FRAME_SEQ),
            width,
            height,
            format,
            par_x: region.read_u16(offsets::FRAME_PAR_X),
            par_y: region.read_u16(offsets::FRAME_PAR_Y),
            buffer_length: frame_buffer_length(width, height, format),
            wants_mouse: LinkFlags::new(region.read_u8(offsets::FLAGS)).wants_mouse(),
        }
    }

    pub fn has_frame(&self) -> bool {
        self.format != IMAGE_FORMAT_NONE
    }

    /// Bytes of the frame buffer that can actually be read.
    pub fn readable_length(&self) -> usize {
        self.buffer_length.min(MAX_FRAME_PAYLOAD)
    }
}

/// A frame copied out of the mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub info: FrameInfo,
    /// 0xAARRGGBB pixels, `info.readable_length()` bytes.
    pub pixels: Arc<[u8]>,
}

impl FrameSnapshot {
    pub fn capture(region: &LinkRegion, info: FrameInfo) -> Self {
        let pixels = region.read_bytes(offsets::FRAME_BUFFER, info.readable_length());
        Self { info, pixels: pixels.into() }
    }
}

/// Identity fields of the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkIdentity {
    pub version: u8,
    pub system_name: String,
    pub program_name: String,
    pub program_hash: [u32; PROGRAM_HASH_WORDS],
    pub ram_size: u32,
}

impl LinkIdentity {
    pub fn read(region: &LinkRegion) -> Self {
        Self {
            version: region.read_u8(offsets::VERSION),
            system_name: region.read_c_string(offsets::SYSTEM, SYSTEM_MAXLEN),
            program_name: region.read_c_string(offsets::PROGRAM, PROGRAM_MAXLEN),
            program_hash: read_program_hash(region),
            ram_size: region.read_u32(offsets::RAM_SIZE),
        }
    }
}

pub(crate) fn read_program_hash(region: &LinkRegion) -> [u32; PROGRAM_HASH_WORDS] {
    std::array::from_fn(|i| region.read_u32(offsets::PROGRAM_HASH + i * 4))
}

/// Location of emulated RAM inside the mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamWindow {
    /// Offset from the start of the mapping.
    pub base_offset: usize,
    /// Readable bytes, never past the end of the mapping.
    pub len: usize,
}

impl RamWindow {
    /// Window for a declared RAM size inside a mapping of `mapping_len` bytes.
    pub fn compute(declared: u32, mapping_len: usize) -> Self {
        let available = mapping_len.saturating_sub(LINK_RECORD_SIZE);
        Self { base_offset: RAM_BASE_OFFSET, len: (declared as usize).min(available) }
    }
}

/// Ask the host to report the program counter in peek slots 0 and 1.
pub fn seed_peeks(region: &LinkRegion) {
    region.write_u32(offsets::PEEK_ADDR, PEEK_SPECIAL_PC_H);
    region.write_u32(offsets::PEEK_ADDR + 4, PEEK_SPECIAL_PC_L);
    region.publish_fence();
    region.write_u32(offsets::PEEK_COUNT, 2);
    trace!("Seeded program counter peeks");
}

/// Result byte `index` of the peek channel, or 0 past the request count.
pub fn peek_byte(region: &LinkRegion, index: usize) -> u8 {
    let count = (region.read_u32(offsets::PEEK_COUNT) as usize).min(PEEK_LIMIT);
    if index >= count {
        return 0;
    }
    region.read_u8(offsets::PEEK_DATA + index)
}
