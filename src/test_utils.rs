//! Test utilities shared by unit tests and benches
//!
//! Everything here runs against [`MemoryHost`], so no emulator needs to be
//! running.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;

use crate::backend::memory::{MemoryBackend, MemoryHost};
use crate::backend::{LinkBackend, SharedMapping};
use crate::layout::MAPPING_NAME;
use crate::region::LinkRegion;
use crate::{Connection, LinkConfig};

/// Lock bound used by tests that expect a wait to time out.
pub const SHORT_TIMEOUT_MS: u64 = 50;

/// A fresh in-process host and a raw view of its record.
///
/// The region stays valid while the returned host is alive.
pub fn test_host() -> (Arc<MemoryHost>, LinkRegion) {
    let host = MemoryHost::builder().build();
    let region = MemoryBackend::new(Arc::clone(&host))
        .open_mapping(MAPPING_NAME)
        .map(|mapping| mapping.region())
        .unwrap_or_else(|e| panic!("in-process mapping must open: {e}"));
    (host, region)
}

/// Default configuration with lock waits shortened to [`SHORT_TIMEOUT_MS`].
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        write_timeout_ms: SHORT_TIMEOUT_MS,
        frame_timeout_ms: SHORT_TIMEOUT_MS,
        ..LinkConfig::default()
    }
}

/// A connected link to `host` using [`fast_config`].
pub fn connected_link(host: &Arc<MemoryHost>) -> Connection<MemoryBackend> {
    let mut link = Connection::with_backend(MemoryBackend::new(Arc::clone(host)), fast_config());
    if let Err(e) = link.connect() {
        panic!("in-process host must accept connections: {e}");
    }
    link
}

/// Deterministic 0xAARRGGBB test pattern of `width` x `height` pixels.
pub fn argb_pattern(width: u16, height: u16, seed: u8) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut bytes = Vec::with_capacity(pixels * 4);
    for i in 0..pixels {
        let x = (i % width.max(1) as usize) as u8;
        let y = (i / width.max(1) as usize) as u8;
        bytes.extend_from_slice(&[x.wrapping_add(seed), y, x ^ y, 0xFF]);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LINK_RECORD_SIZE;

    #[test]
    fn test_host_exposes_a_full_record() {
        let (_host, region) = test_host();
        assert_eq!(region.len(), LINK_RECORD_SIZE);
    }

    #[test]
    fn connected_link_is_active_with_short_timeouts() {
        let (host, _) = test_host();
        let link = connected_link(&host);
        assert!(link.is_active());
        assert_eq!(link.config().write_timeout_ms, SHORT_TIMEOUT_MS);
    }

    #[test]
    fn pattern_has_four_bytes_per_pixel() {
        let pattern = argb_pattern(3, 2, 7);
        assert_eq!(pattern.len(), 24);
        assert_eq!(&pattern[..4], &[7, 0, 0, 0xFF]);
        assert_eq!(&pattern[12..16], &[7, 1, 1, 0xFF]);
    }
}
