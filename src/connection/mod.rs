//! Controller-side link to a running GameLink host
//!
//! A [`Connection`] owns the two host-published objects the protocol needs,
//! the shared-memory mapping and its companion lock, and releases them
//! together. Every protocol operation is a method on it:
//!
//! - lifecycle: [`Connection::connect`], [`Connection::disconnect`], [`Connection::is_active`]
//! - control: [`Connection::send_command`] and the fixed commands
//! - bulk writes: [`Connection::write_payload`] then [`Connection::process`]
//! - input: [`Connection::send_keystroke`], [`Connection::set_mouse_delta`]
//! - audio: [`Connection::set_sound_volume`]
//! - telemetry: [`Connection::frame_info`], [`Connection::frame_sequence`],
//!   [`Connection::peek`], [`Connection::ram`]
//!
//! Readers return defaults while inactive; mutations return
//! [`LinkError::NotConnected`]. Methods that write the to-host buffer take
//! `&mut self`, so a command can never interleave with a bulk write issued
//! through the same connection.
//!
//! ```rust
//! use gamelink::{Connection, LinkConfig};
//! use gamelink::backend::memory::{MemoryBackend, MemoryHost};
//!
//! # fn main() -> gamelink::Result<()> {
//! let host = MemoryHost::builder().ram_size(0x10000).build();
//! let mut link = Connection::with_backend(MemoryBackend::new(host.clone()), LinkConfig::default());
//! link.connect()?;
//!
//! link.sdhr_on()?;
//! link.write_payload(&[0x03, 0x00, 0x01])?;
//! assert!(link.is_ready_to_process());
//! link.process()?;
//! assert!(!link.is_ready_to_process());
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, trace, warn};

use crate::backend::{LinkBackend, PlatformBackend, SharedMapping};
use crate::bulk::{ReadyFlag, write_bulk};
use crate::command::{Command, write_command};
use crate::config::{LinkConfig, VersionCheck};
use crate::guard::LockGuarded;
use crate::input::{KeyboardBitmap, write_keystroke, write_mouse_buttons, write_mouse_delta};
use crate::layout::{
    BUFFER_SIZE, LINK_RECORD_SIZE, MAX_VOLUME, PROGRAM_HASH_WORDS, PROGRAM_MAXLEN,
    PROTOCOL_VERSION, SYSTEM_MAXLEN, offsets,
};
use crate::region::LinkRegion;
use crate::telemetry::{
    FrameInfo, FrameSnapshot, LinkIdentity, RamWindow, peek_byte, read_program_hash, seed_peeks,
};
use crate::types::LinkFlags;
use crate::{LinkError, Result};


/// Objects held while the link is active.
struct ActiveLink<B: LinkBackend> {
    region: LinkRegion,
    ram: RamWindow,
    lock: B::Lock,
    // Declared last so the view is unmapped after everything that uses it.
    _mapping: B::Mapping,
}

/// The controller's end of a GameLink.
pub struct Connection<B: LinkBackend = PlatformBackend> {
    backend: B,
    config: LinkConfig,
    link: Option<ActiveLink<B>>,
    ready: ReadyFlag,
}

impl<B: LinkBackend> std::fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("active", &self.is_active())
            .field("mapping_name", &self.config.mapping_name)
            .field("ready", &self.ready)
            .finish()
    }
}

impl Connection<PlatformBackend> {
    /// An inactive link using this platform's backend.
    #[cfg(unix)]
    pub fn new(config: LinkConfig) -> Self {
        let backend = crate::backend::unix::UnixBackend::new(config.shm_dir.clone());
        Self::with_backend(backend, config)
    }

    /// An inactive link using this platform's backend.
    #[cfg(windows)]
    pub fn new(config: LinkConfig) -> Self {
        Self::with_backend(crate::backend::windows::WindowsBackend, config)
    }
}

impl<B: LinkBackend> Connection<B> {
    /// An inactive link that opens host objects through `backend`.
    pub fn with_backend(backend: B, config: LinkConfig) -> Self {
        Self { backend, config, link: None, ready: ReadyFlag::default() }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open the host's mapping and lock.
    ///
    /// A no-op when already active. On failure the link stays inactive and
    /// nothing it opened is kept; the call can be retried later.
    pub fn connect(&mut self) -> Result<()> {
        if self.link.is_some() {
            trace!("connect() on an active link");
            return Ok(());
        }
        self.config.validate()?;

        let mapping = match self.backend.open_mapping(&self.config.mapping_name) {
            Ok(mapping) => mapping,
            Err(e) => {
                debug!(mapping = %self.config.mapping_name, error = %e, "GameLink host not available");
                return Err(e);
            }
        };
        let region = mapping.region();
        if region.len() < LINK_RECORD_SIZE {
            warn!(len = region.len(), expected = LINK_RECORD_SIZE, "GameLink mapping is too small");
            return Err(LinkError::connection_failed(format!(
                "mapping of {} bytes is shorter than the {LINK_RECORD_SIZE}-byte record",
                region.len()
            )));
        }

        self.check_version(region.read_u8(offsets::VERSION))?;

        let lock = match self.backend.open_lock(&self.config.lock_name) {
            Ok(lock) => lock,
            Err(e) => {
                warn!(
                    lock = %self.config.lock_name,
                    error = %e,
                    "GameLink mapping found without its lock; releasing mapping"
                );
                return Err(e);
            }
        };

        seed_peeks(&region);
        let ram = RamWindow::compute(region.read_u32(offsets::RAM_SIZE), region.len());

        self.link = Some(ActiveLink { region, ram, lock, _mapping: mapping });
        self.ready = ReadyFlag::default();

        info!(
            mapping = %self.config.mapping_name,
            program = %self.program_name(),
            ram_len = ram.len,
            "Connected to GameLink host"
        );

        if self.config.send_video_native {
            self.send(Command::VideoNative)?;
        }
        Ok(())
    }

    fn check_version(&self, found: u8) -> Result<()> {
        if found == PROTOCOL_VERSION {
            return Ok(());
        }
        match self.config.version_check {
            VersionCheck::Strict => {
                warn!(expected = PROTOCOL_VERSION, found, "Refusing GameLink protocol mismatch");
                Err(LinkError::Version { expected: PROTOCOL_VERSION, found })
            }
            VersionCheck::Warn => {
                warn!(expected = PROTOCOL_VERSION, found, "GameLink protocol mismatch; continuing");
                Ok(())
            }
            VersionCheck::Off => Ok(()),
        }
    }

    /// Release the lock and the mapping. Safe to call when inactive.
    pub fn disconnect(&mut self) {
        self.ready = ReadyFlag::default();
        if self.link.take().is_some() {
            info!(mapping = %self.config.mapping_name, "Disconnected from GameLink host");
        }
    }

    pub fn is_active(&self) -> bool {
        self.link.is_some()
    }

    fn active(&self) -> Result<&ActiveLink<B>> {
        self.link.as_ref().ok_or(LinkError::NotConnected)
    }

    fn region(&self) -> Option<&LinkRegion> {
        self.link.as_ref().map(|link| &link.region)
    }

    fn guarded<'a>(&self, link: &'a ActiveLink<B>) -> LockGuarded<'a, B::Lock> {
        LockGuarded::new(&link.lock, self.config.write_timeout())
    }

    // --- command channel ---

    /// Send `text` as one command string.
    pub fn send_command(&mut self, text: &str) -> Result<()> {
        write_command(&self.active()?.region, text).map(|_| ())
    }

    /// Send one of the reserved commands.
    pub fn send(&mut self, command: Command) -> Result<()> {
        self.send_command(command.token())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn sdhr_on(&mut self) -> Result<()> {
        self.send(Command::SdhrOn)
    }

    pub fn sdhr_off(&mut self) -> Result<()> {
        self.send(Command::SdhrOff)
    }

    pub fn sdhr_reset(&mut self) -> Result<()> {
        self.send(Command::SdhrReset)
    }

    // --- bulk writes ---

    /// Publish a pre-encoded SDHR batch and arm [`Connection::process`].
    ///
    /// The host must have consumed the previous payload; nothing here
    /// checks that.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        write_bulk(&self.active()?.region, payload)?;
        self.ready.arm();
        Ok(())
    }

    pub fn is_ready_to_process(&self) -> bool {
        self.ready.is_armed()
    }

    /// Ask the host to run the armed payload. At most once per payload.
    pub fn process(&mut self) -> Result<()> {
        self.active()?;
        if !self.ready.is_armed() {
            warn!("process() without an armed payload; nothing sent");
            return Err(LinkError::NotReady);
        }
        self.send(Command::SdhrProcess)?;
        self.ready.take();
        Ok(())
    }

    // --- lock-guarded fields ---

    /// Set both volume bytes, each clamped to 100.
    pub fn set_sound_volume(&self, main: u8, secondary: u8) -> Result<()> {
        let link = self.active()?;
        let (main, secondary) = (main.min(MAX_VOLUME), secondary.min(MAX_VOLUME));
        self.guarded(link).mutate("set_sound_volume", || {
            link.region.write_u8(offsets::AUDIO_VOL_L, main);
            link.region.write_u8(offsets::AUDIO_VOL_R, secondary);
        })?;
        debug!(main, secondary, "Sound volume set");
        Ok(())
    }

    /// Main volume, or 0 when inactive or the lock is not obtained.
    pub fn sound_volume_main(&self) -> u8 {
        self.read_volume("sound_volume_main", offsets::AUDIO_VOL_L)
    }

    /// Secondary (Mockingboard) volume, or 0 when unavailable.
    pub fn sound_volume_secondary(&self) -> u8 {
        self.read_volume("sound_volume_secondary", offsets::AUDIO_VOL_R)
    }

    fn read_volume(&self, what: &str, offset: usize) -> u8 {
        let Some(link) = self.link.as_ref() else {
            return 0;
        };
        self.guarded(link).read_or_default(what, || link.region.read_u8(offset))
    }

    /// Press or release `scancode` on the secondary keyboard.
    pub fn send_keystroke(&self, scancode: u32, pressed: bool) -> Result<()> {
        let link = self.active()?;
        self.guarded(link).mutate("send_keystroke", || {
            write_keystroke(&link.region, &offsets::INPUT_OTHER, scancode, pressed)
        })??;
        trace!(scancode, pressed, "Keystroke sent");
        Ok(())
    }

    /// Keys currently down on the secondary keyboard.
    pub fn keyboard_state(&self) -> KeyboardBitmap {
        self.region()
            .map(|region| KeyboardBitmap::read(region, &offsets::INPUT_OTHER))
            .unwrap_or_default()
    }

    // --- mouse (unlocked) ---

    pub fn set_mouse_delta(&self, dx: f32, dy: f32) -> Result<()> {
        write_mouse_delta(&self.active()?.region, &offsets::INPUT_OTHER, dx, dy);
        Ok(())
    }

    pub fn set_mouse_buttons(&self, buttons: u8) -> Result<()> {
        write_mouse_buttons(&self.active()?.region, &offsets::INPUT_OTHER, buttons);
        Ok(())
    }

    // --- telemetry ---

    /// Latest frame header.
    ///
    /// The lock is tried for `frame_timeout_ms` as a courtesy; the header is
    /// read whatever the outcome.
    pub fn frame_info(&self) -> FrameInfo {
        let Some(link) = self.link.as_ref() else {
            return FrameInfo::default();
        };
        LockGuarded::new(&link.lock, self.config.frame_timeout())
            .courtesy("frame_info", || FrameInfo::read(&link.region))
    }

    /// Sequence number of the latest frame, without touching the lock.
    pub fn frame_sequence(&self) -> u16 {
        self.region().map(|region| region.read_u16(offsets::FRAME_SEQ)).unwrap_or(0)
    }

    /// Pixels described by `info`, borrowed from the mapping.
    pub fn frame_pixels(&self, info: &FrameInfo) -> &[u8] {
        self.region()
            .and_then(|region| region.slice(offsets::FRAME_BUFFER, info.readable_length()))
            .unwrap_or_default()
    }

    /// Header and pixels copied out together.
    pub fn frame_snapshot(&self) -> Option<FrameSnapshot> {
        let info = self.frame_info();
        if !info.has_frame() {
            return None;
        }
        self.region().map(|region| FrameSnapshot::capture(region, info))
    }

    /// Peek result byte `index`; 0 past the request count or when inactive.
    pub fn peek(&self, index: usize) -> u8 {
        self.region().map(|region| peek_byte(region, index)).unwrap_or(0)
    }

    /// RAM size declared by the host.
    pub fn ram_size(&self) -> u32 {
        self.region().map(|region| region.read_u32(offsets::RAM_SIZE)).unwrap_or(0)
    }

    /// Offset of the RAM window from the start of the mapping.
    pub fn ram_base(&self) -> Option<usize> {
        self.link.as_ref().map(|link| link.ram.base_offset)
    }

    pub fn ram_window(&self) -> Option<RamWindow> {
        self.link.as_ref().map(|link| link.ram)
    }

    /// Emulated RAM, clamped to what is actually mapped.
    pub fn ram(&self) -> &[u8] {
        self.link
            .as_ref()
            .and_then(|link| link.region.slice(link.ram.base_offset, link.ram.len))
            .unwrap_or_default()
    }

    // --- identity ---

    pub fn program_name(&self) -> String {
        self.region()
            .map(|region| region.read_c_string(offsets::PROGRAM, PROGRAM_MAXLEN))
            .unwrap_or_default()
    }

    pub fn system_name(&self) -> String {
        self.region()
            .map(|region| region.read_c_string(offsets::SYSTEM, SYSTEM_MAXLEN))
            .unwrap_or_default()
    }

    pub fn program_hash(&self) -> [u32; PROGRAM_HASH_WORDS] {
        self.region().map(read_program_hash).unwrap_or_default()
    }

    pub fn identity(&self) -> Option<LinkIdentity> {
        self.region().map(LinkIdentity::read)
    }

    pub fn flags(&self) -> LinkFlags {
        self.region()
            .map(|region| LinkFlags::new(region.read_u8(offsets::FLAGS)))
            .unwrap_or_default()
    }

    /// Host runs without publishing frames.
    pub fn is_tracking_only(&self) -> bool {
        self.flags().is_tracking_only()
    }

    pub fn is_paused(&self) -> bool {
        self.flags().is_paused()
    }

    pub fn wants_keyboard(&self) -> bool {
        self.flags().wants_keyboard()
    }

    pub fn wants_mouse(&self) -> bool {
        self.flags().wants_mouse()
    }

    /// Valid bytes of the from-host buffer.
    pub fn host_message(&self) -> Vec<u8> {
        self.region()
            .map(|region| {
                let len = (region.read_u16(offsets::BUF_RECV.payload) as usize).min(BUFFER_SIZE);
                region.read_bytes(offsets::BUF_RECV.data, len)
            })
            .unwrap_or_default()
    }
}

impl<B: LinkBackend> Drop for Connection<B> {
    fn drop(&mut self) {
        if self.link.is_some() {
            debug!("Dropping active GameLink connection");
        }
        self.disconnect();
    }
}
