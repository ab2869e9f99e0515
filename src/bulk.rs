//! Bulk write protocol
//!
//! A pre-encoded SDHR command batch is pushed to the host in one publish:
//!
//! ```text
//! ":sdhr_write" | payload bytes | 0x00 0x00 READY | 0x00
//! ```
//!
//! The trailer is an empty command record (two-byte zero length, then the
//! READY opcode) that closes the batch. The published length counts the tag,
//! the payload, the trailer and one terminator byte, and must fit the
//! 16-bit length field. Once published, the controller arms a one-shot
//! [`ReadyFlag`]; sending `:sdhr_process` consumes it.

use tracing::{debug, error, trace};

use crate::command::SDHR_WRITE_TAG;
use crate::layout::offsets;
use crate::region::LinkRegion;
use crate::{LinkError, Result};

/// Opcode of the SDHR "ready / end of batch" command.
pub const SDHR_READY_OPCODE: u8 = 16;

/// Trailer closing every bulk write.
pub const BULK_TRAILER: [u8; 3] = [0x00, 0x00, SDHR_READY_OPCODE];

/// Bytes added around the payload in the published length.
pub const BULK_OVERHEAD: usize = SDHR_WRITE_TAG.len() + 1 + BULK_TRAILER.len();

/// Largest payload a single bulk write accepts.
pub const MAX_BULK_PAYLOAD: usize = u16::MAX as usize - BULK_OVERHEAD;

/// Published length for a payload of `payload_len` bytes.
///
/// Fails when the sum does not fit in the 16-bit length field.
pub fn bulk_frame_len(payload_len: usize) -> Result<u16> {
    u16::try_from(payload_len)
        .ok()
        .and_then(|len| len.checked_add(BULK_OVERHEAD as u16))
        .ok_or(LinkError::PayloadTooLarge { payload_len, max_payload: MAX_BULK_PAYLOAD })
}

/// Frame `payload` into the to-host buffer and publish its length.
///
/// On error nothing is written.
pub fn write_bulk(region: &LinkRegion, payload: &[u8]) -> Result<u16> {
    let frame_len = match bulk_frame_len(payload.len()) {
        Ok(len) => len,
        Err(e) => {
            error!(
                payload_len = payload.len(),
                max = MAX_BULK_PAYLOAD,
                "Bulk payload too large to prepend the write tag"
            );
            return Err(e);
        }
    };

    let mut cursor = offsets::BUF_TOHOST.data;
    region.write_bytes(cursor, SDHR_WRITE_TAG.as_bytes());
    cursor += SDHR_WRITE_TAG.len();
    region.write_bytes(cursor, payload);
    cursor += payload.len();
    region.write_bytes(cursor, &BULK_TRAILER);
    cursor += BULK_TRAILER.len();
    region.write_u8(cursor, 0);

    region.publish_fence();
    region.write_u16(offsets::BUF_TOHOST.payload, frame_len);

    debug!(payload_len = payload.len(), frame_len, "Published bulk write");
    Ok(frame_len)
}

/// One-shot "payload armed" flag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadyFlag {
    armed: bool,
}

impl ReadyFlag {
    pub fn arm(&mut self) {
        trace!("Bulk payload armed");
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Clear the flag, returning whether it was armed.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_host;
    use proptest::prelude::*;

    #[test]
    fn overhead_and_limits() {
        assert_eq!(BULK_OVERHEAD, 15);
        assert_eq!(MAX_BULK_PAYLOAD, 65_520);
        assert_eq!(bulk_frame_len(0).expect("fits"), 15);
        assert_eq!(bulk_frame_len(MAX_BULK_PAYLOAD).expect("fits"), u16::MAX);
        assert!(bulk_frame_len(MAX_BULK_PAYLOAD + 1).is_err());
        assert!(bulk_frame_len(usize::MAX).is_err());
    }

    #[test]
    fn wire_layout_is_tag_payload_trailer() {
        let (host, region) = test_host();
        let payload = [0x03, 0x00, 0x01, 0x01, 0x08, 0x08];
        let len = write_bulk(&region, &payload).expect("fits");
        assert_eq!(len as usize, 11 + payload.len() + 1 + 3);

        let bytes = host.to_host_bytes();
        assert_eq!(&bytes[..11], b":sdhr_write");
        assert_eq!(&bytes[11..17], &payload);
        assert_eq!(&bytes[17..20], &[0x00, 0x00, SDHR_READY_OPCODE]);
        assert_eq!(bytes[20], 0);
    }

    #[test]
    fn largest_payload_fits_the_buffer() {
        let (host, region) = test_host();
        let payload = vec![0x5A; MAX_BULK_PAYLOAD];
        assert_eq!(write_bulk(&region, &payload).expect("fits"), u16::MAX);
        let bytes = host.to_host_bytes();
        assert_eq!(bytes.len(), u16::MAX as usize);
        assert_eq!(bytes[bytes.len() - 4..], [0x00, 0x00, SDHR_READY_OPCODE, 0x00]);
    }

    #[test]
    fn ready_flag_is_one_shot() {
        let mut flag = ReadyFlag::default();
        assert!(!flag.take());
        flag.arm();
        assert!(flag.is_armed());
        assert!(flag.take());
        assert!(!flag.is_armed());
        assert!(!flag.take());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn oversized_payloads_leave_buffer_untouched(
            extra in 1usize..4096,
            prior_len in 0u16..64,
        ) {
            let (host, region) = test_host();
            host.fill_to_host(0xC3, prior_len);

            let payload = vec![0x11; MAX_BULK_PAYLOAD + extra];
            let result = write_bulk(&region, &payload);
            let rejected = matches!(result, Err(LinkError::PayloadTooLarge { .. }));
            prop_assert!(rejected);
            prop_assert_eq!(host.to_host_len(), prior_len);
            prop_assert_eq!(host.to_host_bytes(), vec![0xC3; prior_len as usize]);
            prop_assert_eq!(region.read_bytes(offsets::BUF_TOHOST.data, 128), vec![0xC3; 128]);
        }

        #[test]
        fn accepted_payloads_publish_exact_length(len in 0usize..2048) {
            let (host, region) = test_host();
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            write_bulk(&region, &payload).expect("fits");
            prop_assert_eq!(host.to_host_len() as usize, len + BULK_OVERHEAD);
            prop_assert_eq!(&host.to_host_bytes()[11..11 + len], &payload[..]);
        }
    }
}
