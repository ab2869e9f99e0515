//! Platform capabilities behind the link
//!
//! The controller needs exactly two host-published OS objects: a named
//! shared-memory mapping and a named process-wide lock. Both are opened,
//! never created. A [`LinkBackend`] knows how to open them on one platform:
//!
//! - [`windows::WindowsBackend`]: `OpenFileMappingW` and `OpenMutexW`
//! - [`unix::UnixBackend`]: a file under `/dev/shm` mapped with `memmap2`,
//!   plus a `flock`ed lock file
//! - [`memory::MemoryBackend`]: an in-process host for tests and tooling
//!
//! Closing is `Drop` on the returned objects.

use std::time::Duration;

use crate::Result;
use crate::region::LinkRegion;

pub mod memory;
#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

/// Outcome of a bounded wait on the link lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// The lock is held by the caller.
    Acquired,
    /// The previous holder died inside its critical section. The caller now
    /// holds the lock but the guarded state may be inconsistent.
    Abandoned,
    /// The lock was not obtained within the bound.
    TimedOut,
    /// The wait itself failed.
    Failed,
}

/// A mapped view of the host's shared record.
pub trait SharedMapping: Send {
    /// View over the whole mapping, valid while `self` is alive.
    fn region(&self) -> LinkRegion;
}

/// The host's companion lock.
pub trait InterprocessLock: Send {
    /// Wait up to `timeout` for the lock.
    fn acquire(&self, timeout: Duration) -> LockWait;

    /// Release a lock obtained with [`LockWait::Acquired`] or [`LockWait::Abandoned`].
    fn release(&self);
}

/// Opens the host-published objects on one platform.
pub trait LinkBackend {
    type Mapping: SharedMapping;
    type Lock: InterprocessLock;

    /// Open and map an existing shared-memory object.
    fn open_mapping(&self, name: &str) -> Result<Self::Mapping>;

    /// Open an existing named lock.
    fn open_lock(&self, name: &str) -> Result<Self::Lock>;
}

/// Backend for the platform this crate was built for.
#[cfg(windows)]
pub type PlatformBackend = windows::WindowsBackend;

/// Backend for the platform this crate was built for.
#[cfg(unix)]
pub type PlatformBackend = unix::UnixBackend;
