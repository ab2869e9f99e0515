//! Command channel
//!
//! Control commands are short ASCII strings written into the to-host buffer
//! with their terminating NUL. The payload length is written last; the host
//! polls it and treats any non-zero length as one command to parse.

use tracing::{debug, warn};

use crate::layout::{BUFFER_SIZE, offsets};
use crate::region::LinkRegion;
use crate::{LinkError, Result};

/// Reserved command tokens understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Host stops flipping video itself; the controller displays frames.
    VideoNative,
    Pause,
    Reset,
    Shutdown,
    /// Enable the high-resolution (SDHR) subsystem.
    SdhrOn,
    /// Disable the high-resolution subsystem.
    SdhrOff,
    /// Reset the high-resolution subsystem's state.
    SdhrReset,
    /// Consume the bulk payload previously written with [`SDHR_WRITE_TAG`].
    SdhrProcess,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::VideoNative,
        Command::Pause,
        Command::Reset,
        Command::Shutdown,
        Command::SdhrOn,
        Command::SdhrOff,
        Command::SdhrReset,
        Command::SdhrProcess,
    ];

    pub const fn token(self) -> &'static str {
        match self {
            Command::VideoNative => ":videonative",
            Command::Pause => ":pause",
            Command::Reset => ":reset",
            Command::Shutdown => ":shutdown",
            Command::SdhrOn => ":sdhr_on",
            Command::SdhrOff => ":sdhr_off",
            Command::SdhrReset => ":sdhr_reset",
            Command::SdhrProcess => ":sdhr_process",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Prefix of a bulk write in the to-host buffer.
pub const SDHR_WRITE_TAG: &str = ":sdhr_write";

/// Longest command string whose length plus terminator fits the u16 length field.
pub const MAX_COMMAND_LEN: usize = u16::MAX as usize - 1;

/// Payload length for `text`: its bytes plus the terminator.
pub fn command_payload_len(text: &str) -> Result<u16> {
    let len = text.len();
    len.checked_add(1)
        .filter(|&total| total <= BUFFER_SIZE)
        .and_then(|total| u16::try_from(total).ok())
        .ok_or(LinkError::CommandTooLong { len, max: MAX_COMMAND_LEN })
}

/// Write `text` as a command into the to-host buffer.
pub fn write_command(region: &LinkRegion, text: &str) -> Result<u16> {
    let payload = match command_payload_len(text) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(len = text.len(), "Command too long for the to-host buffer");
            return Err(e);
        }
    };

    let data = offsets::BUF_TOHOST.data;
    region.write_bytes(data, text.as_bytes());
    region.write_u8(data + text.len(), 0);
    region.publish_fence();
    region.write_u16(offsets::BUF_TOHOST.payload, payload);

    debug!(command = text, payload, "Sent link command");
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_host;
    use proptest::prelude::*;

    #[test]
    fn tokens_are_colon_prefixed_and_distinct() {
        let tokens: std::collections::HashSet<_> = Command::ALL.iter().map(|c| c.token()).collect();
        assert_eq!(tokens.len(), Command::ALL.len());
        assert!(tokens.iter().all(|t| t.starts_with(':')));
        assert!(SDHR_WRITE_TAG.starts_with(':'));
        assert_eq!(Command::VideoNative.to_string(), ":videonative");
    }

    #[test]
    fn command_is_terminated_and_length_includes_nul() {
        let (host, region) = test_host();
        assert_eq!(write_command(&region, ":pause").expect("fits"), 7);
        assert_eq!(host.to_host_bytes(), b":pause\0");
        assert_eq!(host.to_host_command().as_deref(), Some(":pause"));
    }

    #[test]
    fn longest_command_fits_and_longer_is_rejected() {
        let (host, region) = test_host();
        let longest = "x".repeat(MAX_COMMAND_LEN);
        assert_eq!(write_command(&region, &longest).expect("fits"), u16::MAX);

        host.fill_to_host(0xAB, 3);
        let too_long = "x".repeat(MAX_COMMAND_LEN + 1);
        assert!(matches!(
            write_command(&region, &too_long),
            Err(LinkError::CommandTooLong { .. })
        ));
        assert_eq!(host.to_host_len(), 3);
        assert_eq!(host.to_host_bytes(), vec![0xAB; 3]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn framing_matches_command_text(text in "[ -~]{0,512}") {
            let (host, region) = test_host();
            write_command(&region, &text).expect("fits");

            let mut expected = text.clone().into_bytes();
            expected.push(0);
            prop_assert_eq!(host.to_host_len() as usize, text.len() + 1);
            prop_assert_eq!(host.to_host_bytes(), expected);
        }
    }
}
