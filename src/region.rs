//! Bounds-checked view over a mapped link record
//!
//! The record is shared with another process that writes it concurrently,
//! so no Rust reference to its typed contents is ever formed. Scalars are
//! read and written one at a time with unaligned little-endian accesses at
//! the offsets from [`crate::layout::offsets`]. Out-of-range accesses read
//! as zero and drop writes; they can only happen when a mapping is shorter
//! than the record, which [`crate::Connection`] rejects at connect time.

use std::ptr::NonNull;
use std::sync::atomic::{Ordering, fence};
use tracing::warn;

/// Raw view over a mapped region.
///
/// A `LinkRegion` does not own its memory; the mapping object that produced
/// it must outlive every use of the view.
#[derive(Debug, Clone, Copy)]
pub struct LinkRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain bytes shared with another process; all
// accesses are unaligned scalar copies and tolerate concurrent writers.
unsafe impl Send for LinkRegion {}
unsafe impl Sync for LinkRegion {}

impl LinkRegion {
    /// Wrap a mapped range.
    ///
    /// # Safety
    ///
    /// `base` must point to `len` bytes that stay mapped and writable for as
    /// long as this view (or any copy of it) is used.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Length of the mapped range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapped range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn in_bounds(&self, offset: usize, size: usize) -> bool {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => true,
            _ => {
                warn!(offset, size, region_len = self.len, "Link region access out of bounds");
                false
            }
        }
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        if !self.in_bounds(offset, N) {
            return [0; N];
        }
        // SAFETY: bounds checked above; the pointer is valid per `new`.
        unsafe { self.base.as_ptr().add(offset).cast::<[u8; N]>().read_unaligned() }
    }

    fn write_array<const N: usize>(&self, offset: usize, bytes: [u8; N]) {
        if !self.in_bounds(offset, N) {
            return;
        }
        // SAFETY: bounds checked above; the pointer is valid per `new`.
        unsafe { self.base.as_ptr().add(offset).cast::<[u8; N]>().write_unaligned(bytes) }
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.read_array::<1>(offset)[0]
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.read_array(offset))
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.read_array(offset))
    }

    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.read_array(offset))
    }

    pub fn write_u8(&self, offset: usize, value: u8) {
        self.write_array(offset, [value]);
    }

    pub fn write_u16(&self, offset: usize, value: u16) {
        self.write_array(offset, value.to_le_bytes());
    }

    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write_array(offset, value.to_le_bytes());
    }

    pub fn write_f32(&self, offset: usize, value: f32) {
        self.write_array(offset, value.to_le_bytes());
    }

    /// Copy `bytes` into the region starting at `offset`.
    ///
    /// Returns `false` and writes nothing when the range does not fit.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> bool {
        if !self.in_bounds(offset, bytes.len()) {
            return false;
        }
        // SAFETY: bounds checked above; source is a distinct Rust slice.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.base.as_ptr().add(offset),
                bytes.len(),
            );
        }
        true
    }

    /// Copy `len` bytes starting at `offset` out of the region.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        if !self.in_bounds(offset, len) {
            return Vec::new();
        }
        self.slice(offset, len).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Borrow `len` bytes starting at `offset`.
    ///
    /// The host may rewrite these bytes at any moment; callers get a
    /// best-effort view that can be torn.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        // SAFETY: range checked above; lifetime tied to `&self`, whose
        // backing mapping outlives it per `new`.
        Some(unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) })
    }

    /// Read a null-terminated string from a fixed-capacity field.
    pub fn read_c_string(&self, offset: usize, capacity: usize) -> String {
        let Some(field) = self.slice(offset, capacity) else {
            return String::new();
        };
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        String::from_utf8_lossy(&field[..end]).into_owned()
    }

    /// Order all preceding writes before any following one.
    ///
    /// Used before publishing a length field so a polling reader that sees
    /// the length also sees the data.
    pub fn publish_fence(&self) {
        fence(Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_over(buf: &mut [u8]) -> LinkRegion {
        let base = NonNull::new(buf.as_mut_ptr()).expect("non-null buffer");
        unsafe { LinkRegion::new(base, buf.len()) }
    }

    #[test]
    fn scalars_are_little_endian_and_unaligned() {
        let mut buf = vec![0u8; 16];
        let region = region_over(&mut buf);

        region.write_u16(1, 0xBEEF);
        region.write_u32(3, 0x0102_0304);
        region.write_f32(7, 1.5);

        assert_eq!(region.read_u16(1), 0xBEEF);
        assert_eq!(region.read_u32(3), 0x0102_0304);
        assert_eq!(region.read_f32(7), 1.5);
        assert_eq!(buf[1..3], [0xEF, 0xBE]);
        assert_eq!(buf[3..7], [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn out_of_range_accesses_are_inert() {
        let mut buf = vec![0xAAu8; 4];
        let region = region_over(&mut buf);

        assert_eq!(region.read_u32(2), 0);
        region.write_u32(2, 0);
        assert!(!region.write_bytes(3, &[1, 2]));
        assert!(region.slice(usize::MAX, 2).is_none());
        assert!(region.read_bytes(3, 5).is_empty());
        assert_eq!(buf, vec![0xAA; 4]);
    }

    #[test]
    fn c_string_stops_at_terminator_or_capacity() {
        let mut buf = vec![0u8; 12];
        buf[..5].copy_from_slice(b"Hello");
        buf[6..12].copy_from_slice(b"Worlds");
        let region = region_over(&mut buf);

        assert_eq!(region.read_c_string(0, 8), "Hello");
        assert_eq!(region.read_c_string(6, 6), "Worlds");
        assert_eq!(region.read_c_string(10, 8), "");
    }
}
