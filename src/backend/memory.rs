//! In-process GameLink host
//!
//! [`MemoryHost`] plays the emulator's part of the protocol inside the
//! current process: it owns a heap-allocated record (plus RAM window),
//! publishes it under a name, and exposes a companion lock that tests can
//! hold, abandon or withhold. [`MemoryBackend`] opens those objects the way
//! the platform backends open the real ones.
//!
//! ```rust
//! use gamelink::{Connection, LinkConfig};
//! use gamelink::backend::memory::{MemoryBackend, MemoryHost};
//!
//! let host = MemoryHost::builder().program_name("ULTIMA4").ram_size(0x10000).build();
//! let mut link = Connection::with_backend(MemoryBackend::new(host.clone()), LinkConfig::default());
//! link.connect().unwrap();
//! assert_eq!(link.program_name(), "ULTIMA4");
//! assert_eq!(host.to_host_command().as_deref(), Some(":videonative"));
//! ```

use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::{InterprocessLock, LinkBackend, LockWait, SharedMapping};
use crate::layout::{
    self, IMAGE_FORMAT_ARGB32, KEYBOARD_WORDS, LINK_RECORD_SIZE, LOCK_NAME, MAPPING_NAME,
    PROGRAM_MAXLEN, SYSTEM_MAXLEN, offsets,
};
use crate::region::LinkRegion;
use crate::{LinkError, Result};

/// Heap storage for a record plus RAM window.
struct HostMemory {
    base: NonNull<u8>,
    len: usize,
}

impl HostMemory {
    fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed);
        // SAFETY: `Box::into_raw` never returns null.
        let base = unsafe { NonNull::new_unchecked(raw.cast::<u8>()) };
        Self { base, len }
    }

    fn region(&self) -> LinkRegion {
        // SAFETY: the allocation lives until `HostMemory` is dropped, and every
        // holder of a region also holds an `Arc` to the host.
        unsafe { LinkRegion::new(self.base, self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.len);
        // SAFETY: reconstructs the box leaked in `zeroed`.
        drop(unsafe { Box::from_raw(slice) });
    }
}

// SAFETY: plain bytes accessed only through unaligned scalar copies.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    abandoned: bool,
}

/// Condvar-based stand-in for the host's named mutex.
#[derive(Debug, Default)]
struct HostLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl HostLock {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, timeout: Duration) -> LockWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while state.held {
            let now = Instant::now();
            if now >= deadline {
                return LockWait::TimedOut;
            }
            state = match self.released.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return LockWait::Failed,
            };
        }
        state.held = true;
        if std::mem::take(&mut state.abandoned) {
            LockWait::Abandoned
        } else {
            LockWait::Acquired
        }
    }

    fn hold(&self) {
        let mut state = self.state();
        while state.held {
            state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.held = true;
    }

    fn release(&self) {
        self.state().held = false;
        self.released.notify_one();
    }

    fn abandon(&self) {
        let mut state = self.state();
        state.held = false;
        state.abandoned = true;
        drop(state);
        self.released.notify_one();
    }
}

/// An emulator-side GameLink endpoint living in this process.
pub struct MemoryHost {
    mapping_name: String,
    lock_name: String,
    publish_lock: bool,
    memory: HostMemory,
    lock: HostLock,
}

impl std::fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHost")
            .field("mapping_name", &self.mapping_name)
            .field("lock_name", &self.lock_name)
            .field("publish_lock", &self.publish_lock)
            .field("len", &self.memory.len)
            .finish()
    }
}

/// Builder for [`MemoryHost`].
#[derive(Debug, Clone)]
pub struct MemoryHostBuilder {
    mapping_name: String,
    lock_name: String,
    publish_lock: bool,
    version: u8,
    flags: u8,
    system: String,
    program: String,
    program_hash: [u32; 4],
    ram_size: u32,
    mapped_ram: Option<usize>,
}

impl Default for MemoryHostBuilder {
    fn default() -> Self {
        Self {
            mapping_name: MAPPING_NAME.to_string(),
            lock_name: LOCK_NAME.to_string(),
            publish_lock: true,
            version: layout::PROTOCOL_VERSION,
            flags: 0,
            system: "AppleWin".to_string(),
            program: String::new(),
            program_hash: [0; 4],
            ram_size: 0,
            mapped_ram: None,
        }
    }
}

impl MemoryHostBuilder {
    pub fn mapping_name(mut self, name: impl Into<String>) -> Self {
        self.mapping_name = name.into();
        self
    }

    pub fn lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Publish the mapping but no companion lock.
    pub fn without_lock(mut self) -> Self {
        self.publish_lock = false;
        self
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn system_name(mut self, name: impl Into<String>) -> Self {
        self.system = name.into();
        self
    }

    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program = name.into();
        self
    }

    pub fn program_hash(mut self, hash: [u32; 4]) -> Self {
        self.program_hash = hash;
        self
    }

    /// Declared RAM size; the same number of bytes is mapped after the record.
    pub fn ram_size(mut self, size: u32) -> Self {
        self.ram_size = size;
        self
    }

    /// Map a different number of RAM bytes than the header declares.
    pub fn mapped_ram(mut self, len: usize) -> Self {
        self.mapped_ram = Some(len);
        self
    }

    pub fn build(self) -> Arc<MemoryHost> {
        let ram_len = self.mapped_ram.unwrap_or(self.ram_size as usize);
        let memory = HostMemory::zeroed(LINK_RECORD_SIZE + ram_len);
        let region = memory.region();

        region.write_u8(offsets::VERSION, self.version);
        region.write_u8(offsets::FLAGS, self.flags);
        write_c_string(&region, offsets::SYSTEM, SYSTEM_MAXLEN, &self.system);
        write_c_string(&region, offsets::PROGRAM, PROGRAM_MAXLEN, &self.program);
        for (i, word) in self.program_hash.iter().enumerate() {
            region.write_u32(offsets::PROGRAM_HASH + i * 4, *word);
        }
        region.write_u32(offsets::RAM_SIZE, self.ram_size);

        debug!(
            mapping = %self.mapping_name,
            len = memory.len,
            version = self.version,
            "In-process GameLink host created"
        );

        Arc::new(MemoryHost {
            mapping_name: self.mapping_name,
            lock_name: self.lock_name,
            publish_lock: self.publish_lock,
            memory,
            lock: HostLock::default(),
        })
    }
}

fn write_c_string(region: &LinkRegion, offset: usize, capacity: usize, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(capacity.saturating_sub(1));
    region.write_bytes(offset, &bytes[..len]);
    region.write_u8(offset + len, 0);
}

impl MemoryHost {
    pub fn builder() -> MemoryHostBuilder {
        MemoryHostBuilder::default()
    }

    fn region(&self) -> LinkRegion {
        self.memory.region()
    }

    pub fn set_flags(&self, flags: u8) {
        self.region().write_u8(offsets::FLAGS, flags);
    }

    /// Publish a frame the way the emulator's video path does.
    ///
    /// `pixels` is copied into the frame buffer (truncated to capacity) and
    /// the sequence number is bumped last.
    pub fn publish_frame(&self, width: u16, height: u16, pixels: &[u8]) -> u16 {
        let region = self.region();
        let len = pixels.len().min(layout::MAX_FRAME_PAYLOAD);
        region.write_bytes(offsets::FRAME_BUFFER, &pixels[..len]);
        region.write_u16(offsets::FRAME_WIDTH, width);
        region.write_u16(offsets::FRAME_HEIGHT, height);
        region.write_u8(offsets::FRAME_FORMAT, IMAGE_FORMAT_ARGB32);
        region.write_u16(offsets::FRAME_PAR_X, 1);
        region.write_u16(offsets::FRAME_PAR_Y, 1);
        let seq = region.read_u16(offsets::FRAME_SEQ).wrapping_add(1);
        region.publish_fence();
        region.write_u16(offsets::FRAME_SEQ, seq);
        trace!(seq, width, height, "Host published frame");
        seq
    }

    /// Overwrite raw frame header fields.
    pub fn set_frame_header(&self, seq: u16, width: u16, height: u16, format: u8) {
        let region = self.region();
        region.write_u16(offsets::FRAME_SEQ, seq);
        region.write_u16(offsets::FRAME_WIDTH, width);
        region.write_u16(offsets::FRAME_HEIGHT, height);
        region.write_u8(offsets::FRAME_FORMAT, format);
    }

    /// Answer the current peek requests with `data`.
    pub fn answer_peeks(&self, data: &[u8]) {
        let region = self.region();
        let count = (region.read_u32(offsets::PEEK_COUNT) as usize).min(layout::PEEK_LIMIT);
        let len = data.len().min(count);
        region.write_bytes(offsets::PEEK_DATA, &data[..len]);
    }

    /// Current peek requests, as written by the controller.
    pub fn peek_requests(&self) -> Vec<u32> {
        let region = self.region();
        let count = (region.read_u32(offsets::PEEK_COUNT) as usize).min(layout::PEEK_LIMIT);
        (0..count).map(|i| region.read_u32(offsets::PEEK_ADDR + i * 4)).collect()
    }

    /// Payload length of the to-host buffer.
    pub fn to_host_len(&self) -> u16 {
        self.region().read_u16(offsets::BUF_TOHOST.payload)
    }

    /// Valid bytes of the to-host buffer (`payload` bytes).
    pub fn to_host_bytes(&self) -> Vec<u8> {
        let len = self.to_host_len() as usize;
        self.region().read_bytes(offsets::BUF_TOHOST.data, len)
    }

    /// The to-host buffer as a command string, if it holds one.
    pub fn to_host_command(&self) -> Option<String> {
        if self.to_host_len() == 0 {
            return None;
        }
        Some(self.region().read_c_string(offsets::BUF_TOHOST.data, layout::BUFFER_SIZE))
    }

    /// Consume the to-host buffer the way the emulator does after parsing it.
    pub fn consume_to_host(&self) {
        self.region().write_u16(offsets::BUF_TOHOST.payload, 0);
    }

    /// Fill the to-host buffer with a marker pattern.
    pub fn fill_to_host(&self, byte: u8, len: u16) {
        let region = self.region();
        region.write_bytes(offsets::BUF_TOHOST.data, &vec![byte; layout::BUFFER_SIZE]);
        region.write_u16(offsets::BUF_TOHOST.payload, len);
    }

    /// Post a message on the from-host buffer.
    pub fn post_message(&self, bytes: &[u8]) {
        let region = self.region();
        let len = bytes.len().min(layout::BUFFER_SIZE).min(u16::MAX as usize);
        region.write_bytes(offsets::BUF_RECV.data, &bytes[..len]);
        region.publish_fence();
        region.write_u16(offsets::BUF_RECV.payload, len as u16);
    }

    pub fn volume(&self) -> (u8, u8) {
        let region = self.region();
        (region.read_u8(offsets::AUDIO_VOL_L), region.read_u8(offsets::AUDIO_VOL_R))
    }

    pub fn set_volume(&self, main: u8, secondary: u8) {
        let region = self.region();
        region.write_u8(offsets::AUDIO_VOL_L, main);
        region.write_u8(offsets::AUDIO_VOL_R, secondary);
    }

    /// Keyboard bitmap of the secondary input channel.
    pub fn keyboard_words(&self) -> [u32; KEYBOARD_WORDS] {
        let region = self.region();
        std::array::from_fn(|i| region.read_u32(offsets::INPUT_OTHER.keyb_state + i * 4))
    }

    /// Ready marker of the secondary input channel.
    pub fn input_ready(&self) -> u8 {
        self.region().read_u8(offsets::INPUT_OTHER.ready)
    }

    /// Mouse delta and buttons of the secondary input channel.
    pub fn mouse(&self) -> (f32, f32, u8) {
        let region = self.region();
        (
            region.read_f32(offsets::INPUT_OTHER.mouse_dx),
            region.read_f32(offsets::INPUT_OTHER.mouse_dy),
            region.read_u8(offsets::INPUT_OTHER.mouse_btn),
        )
    }

    /// Write emulated RAM.
    pub fn write_ram(&self, offset: usize, bytes: &[u8]) -> bool {
        self.region().write_bytes(layout::RAM_BASE_OFFSET + offset, bytes)
    }

    /// Take the companion lock as the host would.
    pub fn hold_lock(&self) {
        self.lock.hold();
    }

    pub fn release_lock(&self) {
        self.lock.release();
    }

    /// Simulate the lock holder dying inside its critical section.
    pub fn abandon_lock(&self) {
        self.lock.abandon();
    }

    pub fn is_lock_held(&self) -> bool {
        self.lock.state().held
    }
}

/// Opens the objects published by one [`MemoryHost`].
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    host: Arc<MemoryHost>,
}

impl MemoryBackend {
    pub fn new(host: Arc<MemoryHost>) -> Self {
        Self { host }
    }
}

impl LinkBackend for MemoryBackend {
    type Mapping = MemoryMapping;
    type Lock = MemoryLock;

    fn open_mapping(&self, name: &str) -> Result<MemoryMapping> {
        if name != self.host.mapping_name {
            return Err(LinkError::connection_failed(format!("no mapping named '{name}'")));
        }
        Ok(MemoryMapping { host: Arc::clone(&self.host) })
    }

    fn open_lock(&self, name: &str) -> Result<MemoryLock> {
        if !self.host.publish_lock || name != self.host.lock_name {
            return Err(LinkError::LockUnavailable { lock: name.to_string() });
        }
        Ok(MemoryLock { host: Arc::clone(&self.host) })
    }
}

/// Controller view of a [`MemoryHost`] record.
#[derive(Debug)]
pub struct MemoryMapping {
    host: Arc<MemoryHost>,
}

impl SharedMapping for MemoryMapping {
    fn region(&self) -> LinkRegion {
        self.host.region()
    }
}

/// Controller handle on a [`MemoryHost`] lock.
#[derive(Debug)]
pub struct MemoryLock {
    host: Arc<MemoryHost>,
}

impl InterprocessLock for MemoryLock {
    fn acquire(&self, timeout: Duration) -> LockWait {
        self.host.lock.acquire(timeout)
    }

    fn release(&self) {
        self.host.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_writes_header_fields() {
        let host = MemoryHost::builder()
            .system_name("AppleWin")
            .program_name("ULTIMA4")
            .program_hash([1, 2, 3, 4])
            .ram_size(0x100)
            .flags(layout::flags::WANT_MOUSE)
            .build();
        let region = host.region();

        assert_eq!(region.len(), LINK_RECORD_SIZE + 0x100);
        assert_eq!(region.read_u8(offsets::VERSION), layout::PROTOCOL_VERSION);
        assert_eq!(region.read_u8(offsets::FLAGS), layout::flags::WANT_MOUSE);
        assert_eq!(region.read_c_string(offsets::SYSTEM, SYSTEM_MAXLEN), "AppleWin");
        assert_eq!(region.read_c_string(offsets::PROGRAM, PROGRAM_MAXLEN), "ULTIMA4");
        assert_eq!(region.read_u32(offsets::PROGRAM_HASH + 12), 4);
        assert_eq!(region.read_u32(offsets::RAM_SIZE), 0x100);
    }

    #[test]
    fn overlong_names_are_truncated_and_terminated() {
        let host = MemoryHost::builder().system_name("S".repeat(100)).build();
        let name = host.region().read_c_string(offsets::SYSTEM, SYSTEM_MAXLEN);
        assert_eq!(name.len(), SYSTEM_MAXLEN - 1);
    }

    #[test]
    fn lock_times_out_while_held_and_reports_abandonment() {
        let host = MemoryHost::builder().build();
        host.hold_lock();
        assert_eq!(host.lock.acquire(Duration::from_millis(20)), LockWait::TimedOut);

        host.abandon_lock();
        assert_eq!(host.lock.acquire(Duration::from_millis(20)), LockWait::Abandoned);
        host.release_lock();
        assert_eq!(host.lock.acquire(Duration::from_millis(20)), LockWait::Acquired);
        host.release_lock();
        assert!(!host.is_lock_held());
    }

    #[test]
    fn waiting_acquire_wakes_on_release() {
        let host = MemoryHost::builder().build();
        host.hold_lock();

        let waiter = {
            let host = Arc::clone(&host);
            std::thread::spawn(move || host.lock.acquire(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        host.release_lock();

        assert_eq!(waiter.join().expect("waiter thread"), LockWait::Acquired);
    }

    #[test]
    fn backend_checks_names_and_lock_publication() {
        let host = MemoryHost::builder().without_lock().build();
        let backend = MemoryBackend::new(host);

        assert!(backend.open_mapping(MAPPING_NAME).is_ok());
        assert!(matches!(backend.open_mapping("other"), Err(LinkError::Connection { .. })));
        assert!(matches!(backend.open_lock(LOCK_NAME), Err(LinkError::LockUnavailable { .. })));
    }

    #[test]
    fn frames_bump_sequence_with_wraparound() {
        let host = MemoryHost::builder().build();
        host.set_frame_header(u16::MAX, 0, 0, 0);
        assert_eq!(host.publish_frame(2, 2, &[0xFF; 16]), 0);
        assert_eq!(host.publish_frame(2, 2, &[0xFF; 16]), 1);
    }
}
