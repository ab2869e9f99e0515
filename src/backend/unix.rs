//! File-backed mapping and `flock` lock on unix
//!
//! POSIX shared-memory objects live as files under `/dev/shm` on Linux, so a
//! host that calls `shm_open(name)` is reachable by mapping
//! `<shm_dir>/<name>`. The companion lock is a file next to it; the
//! controller holds `flock(LOCK_EX)` on it for the guarded sections. The
//! kernel drops a `flock` when its holder dies, so [`LockWait::Abandoned`]
//! never occurs on this platform.

use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{InterprocessLock, LinkBackend, LockWait, SharedMapping};
use crate::region::LinkRegion;
use crate::{LinkError, Result};

/// Sleep between non-blocking `flock` attempts.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Opens GameLink objects as files in a shared-memory directory.
#[derive(Debug, Clone)]
pub struct UnixBackend {
    shm_dir: PathBuf,
}

impl UnixBackend {
    pub fn new(shm_dir: impl Into<PathBuf>) -> Self {
        Self { shm_dir: shm_dir.into() }
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.shm_dir.join(name.trim_start_matches('/'))
    }
}

impl Default for UnixBackend {
    fn default() -> Self {
        Self::new("/dev/shm")
    }
}

impl LinkBackend for UnixBackend {
    type Mapping = UnixMapping;
    type Lock = FileLock;

    fn open_mapping(&self, name: &str) -> Result<UnixMapping> {
        let path = self.object_path(name);
        trace!(path = %path.display(), "Opening GameLink mapping file");

        let file = OpenOptions::new().read(true).write(true).open(&path).map_err(|e| {
            LinkError::connection_failed_with_source(
                format!("cannot open {}", path.display()),
                Box::new(e),
            )
        })?;

        // SAFETY: the host owns the file and may write it concurrently; all
        // accesses go through `LinkRegion`, which never forms references to
        // typed contents.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            LinkError::connection_failed_with_source(
                format!("cannot map {}", path.display()),
                Box::new(e),
            )
        })?;

        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| LinkError::connection_failed("mapping is empty"))?;
        let len = mmap.len();

        debug!(path = %path.display(), len, "Mapped GameLink file");
        Ok(UnixMapping { _mmap: mmap, base, len })
    }

    fn open_lock(&self, name: &str) -> Result<FileLock> {
        let path = self.object_path(name);
        trace!(path = %path.display(), "Opening GameLink lock file");
        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|_| LinkError::LockUnavailable { lock: path.display().to_string() })?;
        Ok(FileLock { file })
    }
}

/// A mapped GameLink file.
pub struct UnixMapping {
    _mmap: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

impl SharedMapping for UnixMapping {
    fn region(&self) -> LinkRegion {
        // SAFETY: `_mmap` keeps the pages mapped until `self` is dropped.
        unsafe { LinkRegion::new(self.base, self.len) }
    }
}

// SAFETY: the pointer targets pages owned by `_mmap`, which is Send.
unsafe impl Send for UnixMapping {}

/// Exclusive `flock` on the companion lock file.
pub struct FileLock {
    file: File,
}

impl InterprocessLock for FileLock {
    fn acquire(&self, timeout: Duration) -> LockWait {
        let deadline = Instant::now() + timeout;
        let fd = self.file.as_raw_fd();
        loop {
            // SAFETY: `fd` is a valid descriptor owned by `self.file`.
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return LockWait::Acquired;
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) | Some(libc::EINTR) => {}
                _ => {
                    warn!(error = %err, "flock failed on GameLink lock file");
                    return LockWait::Failed;
                }
            }

            if Instant::now() >= deadline {
                return LockWait::TimedOut;
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    fn release(&self) {
        // SAFETY: `fd` is a valid descriptor owned by `self.file`.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(error = %std::io::Error::last_os_error(), "Failed to unlock GameLink lock file");
        }
    }
}
