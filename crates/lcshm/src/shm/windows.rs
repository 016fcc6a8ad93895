//! Windows backend: named mutex and pagefile-backed file mapping.
//!
//! Named kernel objects live in the session-local namespace, which
//! already scopes them to the interactive logon; both scopes therefore
//! use the same object names.

use std::ffi::CString;
use std::io;
use std::ptr;

use winapi::ctypes::c_void;
use winapi::shared::minwindef::DWORD;
use winapi::shared::winerror::WAIT_TIMEOUT;
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::memoryapi::{MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS};
use winapi::um::synchapi::{CreateMutexA, ReleaseMutex, WaitForSingleObject};
use winapi::um::winbase::{CreateFileMappingA, INFINITE, WAIT_ABANDONED, WAIT_OBJECT_0};
use winapi::um::winnt::{HANDLE, PAGE_READWRITE};

use crate::errors::{LcshmError, Result};
use crate::layout;

/// Named-object names; each at most 23 characters plus NUL.
const MUTEX_NAME: &str = "MacromediaMutexOmega";
const MAPPING_NAME: &str = "MacromediaFMOmega";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub sem: String,
    pub shm: String,
}

pub(super) fn keys(_is_per_user: bool) -> Keys {
    Keys {
        sem: MUTEX_NAME.to_owned(),
        shm: MAPPING_NAME.to_owned(),
    }
}

pub(super) struct Raw {
    sem: HANDLE,
    shm: HANDLE,
    addr: *mut c_void,
}

// SAFETY: kernel handles are opaque and thread-agnostic; the view pointer
// targets OS-managed shared memory. Region access is synchronized by the
// mutex plus `&mut` on the channel.
unsafe impl Send for Raw {}

fn unavailable() -> LcshmError {
    LcshmError::Unavailable(io::Error::last_os_error())
}

pub(super) fn open(is_per_user: bool) -> Result<Raw> {
    let keys = keys(is_per_user);
    let sem_name = CString::new(keys.sem)
        .map_err(|_| LcshmError::Unavailable(io::Error::other("NUL in mutex name")))?;
    let shm_name = CString::new(keys.shm)
        .map_err(|_| LcshmError::Unavailable(io::Error::other("NUL in mapping name")))?;

    // Opens the existing mutex when another participant created it first.
    let sem = unsafe { CreateMutexA(ptr::null_mut(), 0, sem_name.as_ptr()) };
    if sem.is_null() {
        return Err(unavailable());
    }

    // Pagefile-backed mapping; a freshly created one is zero-filled.
    let shm = unsafe {
        CreateFileMappingA(
            INVALID_HANDLE_VALUE,
            ptr::null_mut(),
            PAGE_READWRITE,
            0,
            layout::SIZE as DWORD,
            shm_name.as_ptr(),
        )
    };
    if shm.is_null() {
        let err = unavailable();
        unsafe { CloseHandle(sem) };
        return Err(err);
    }

    let addr = unsafe { MapViewOfFile(shm, FILE_MAP_ALL_ACCESS, 0, 0, layout::SIZE) };
    if addr.is_null() {
        let err = unavailable();
        unsafe {
            CloseHandle(shm);
            CloseHandle(sem);
        }
        return Err(err);
    }

    Ok(Raw { sem, shm, addr })
}

impl Raw {
    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.addr.cast()
    }

    pub(super) fn lock(&self) -> Result<()> {
        // An abandoned mutex still grants ownership; the region survives
        // its previous holder.
        match unsafe { WaitForSingleObject(self.sem, INFINITE) } {
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(()),
            _ => Err(LcshmError::LockLost(io::Error::last_os_error())),
        }
    }

    pub(super) fn try_lock(&self) -> Result<bool> {
        match unsafe { WaitForSingleObject(self.sem, 0) } {
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(LcshmError::LockLost(io::Error::last_os_error())),
        }
    }

    pub(super) fn unlock(&self) -> Result<()> {
        if unsafe { ReleaseMutex(self.sem) } == 0 {
            Err(LcshmError::LockLost(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }
}

impl Drop for Raw {
    fn drop(&mut self) {
        // Local handles only; the named objects persist while any other
        // process holds them open.
        unsafe {
            UnmapViewOfFile(self.addr);
            CloseHandle(self.shm);
            CloseHandle(self.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_names_fit_the_budget() {
        let keys = keys(false);
        assert!(keys.sem.len() <= 23);
        assert!(keys.shm.len() <= 23);
    }
}
