//! Named file mapping and named mutex on Windows
//!
//! Mirrors what the host's GameLink code does on its side: the host calls
//! `CreateFileMapping` and `CreateMutex` under well-known names, and this
//! backend opens both with full access.

use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, trace, warn};
use windows::Win32::Foundation::{
    CloseHandle, HANDLE, WAIT_ABANDONED, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::System::Memory::{
    FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
};
use windows::Win32::System::Threading::{
    INFINITE, OpenMutexW, ReleaseMutex, SYNCHRONIZATION_ACCESS_RIGHTS, WaitForSingleObject,
};
use windows::core::PCWSTR;

use super::{InterprocessLock, LinkBackend, LockWait, SharedMapping};
use crate::region::LinkRegion;
use crate::{LinkError, Result};

/// SYNCHRONIZE access right, enough to wait on and release a mutex.
const SYNCHRONIZE: SYNCHRONIZATION_ACCESS_RIGHTS = SYNCHRONIZATION_ACCESS_RIGHTS(0x0010_0000);

/// Opens GameLink objects through the Win32 API.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBackend;

impl LinkBackend for WindowsBackend {
    type Mapping = WindowsMapping;
    type Lock = WindowsMutex;

    fn open_mapping(&self, name: &str) -> Result<WindowsMapping> {
        trace!(name, "Opening GameLink file mapping");

        let handle = unsafe {
            let wide_name = wide_string(name);
            OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, PCWSTR::from_raw(wide_name.as_ptr()))
                .map_err(|e| {
                    LinkError::connection_failed_with_source(
                        format!("cannot open file mapping '{name}'"),
                        Box::new(e),
                    )
                })?
        };

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        let Some(base) = NonNull::new(view.Value as *mut u8) else {
            let win_err = windows::core::Error::from_thread();
            unsafe {
                let _ = CloseHandle(handle);
            }
            return Err(LinkError::windows_api_error("MapViewOfFile", win_err));
        };

        // A zero-length view maps the whole object; ask the VM how much that is.
        let mut info = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQuery(
                Some(base.as_ptr() as *const _),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        let len = if written == 0 { 0 } else { info.RegionSize };

        debug!(name, len, "Mapped GameLink view");
        Ok(WindowsMapping { handle, base, len })
    }

    fn open_lock(&self, name: &str) -> Result<WindowsMutex> {
        trace!(name, "Opening GameLink mutex");
        let handle = unsafe {
            let wide_name = wide_string(name);
            OpenMutexW(SYNCHRONIZE, false, PCWSTR::from_raw(wide_name.as_ptr())).map_err(|e| {
                debug!(name, error = %e, "OpenMutexW failed");
                LinkError::LockUnavailable { lock: name.to_string() }
            })?
        };
        Ok(WindowsMutex { handle })
    }
}

/// A mapped view of the host's file mapping.
pub struct WindowsMapping {
    handle: HANDLE,
    base: NonNull<u8>,
    len: usize,
}

impl SharedMapping for WindowsMapping {
    fn region(&self) -> LinkRegion {
        // SAFETY: the view stays mapped until `self` is dropped.
        unsafe { LinkRegion::new(self.base, self.len) }
    }
}

impl Drop for WindowsMapping {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ };
            let _ = UnmapViewOfFile(addr);
            let _ = CloseHandle(self.handle);
        }
    }
}

// SAFETY: the mapping only holds a kernel handle and the view address, both
// usable from any thread.
unsafe impl Send for WindowsMapping {}

/// The host's named mutex.
pub struct WindowsMutex {
    handle: HANDLE,
}

impl InterprocessLock for WindowsMutex {
    fn acquire(&self, timeout: Duration) -> LockWait {
        let result = unsafe { WaitForSingleObject(self.handle, wait_millis(timeout)) };
        match result {
            WAIT_OBJECT_0 => LockWait::Acquired,
            WAIT_ABANDONED => LockWait::Abandoned,
            WAIT_TIMEOUT => LockWait::TimedOut,
            WAIT_FAILED => {
                let win_err = windows::core::Error::from_thread();
                warn!(error = %win_err, "WaitForSingleObject failed on GameLink mutex");
                LockWait::Failed
            }
            other => {
                warn!(code = other.0, "Unexpected wait result on GameLink mutex");
                LockWait::Failed
            }
        }
    }

    fn release(&self) {
        if let Err(e) = unsafe { ReleaseMutex(self.handle) } {
            warn!(error = %e, "ReleaseMutex failed on GameLink mutex");
        }
    }
}

impl Drop for WindowsMutex {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

// SAFETY: mutex handles are kernel objects usable from any thread.
unsafe impl Send for WindowsMutex {}

/// Convert string to null-terminated wide string for Windows APIs
fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// Wait bound for `WaitForSingleObject`, kept below `INFINITE`.
fn wait_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(INFINITE - 1)) as u32
}
