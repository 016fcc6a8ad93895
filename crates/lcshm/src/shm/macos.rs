//! macOS backend: named POSIX semaphore over the shared SysV segment.

use std::ffi::CString;
use std::io;

use nix::errno::Errno;
use nix::libc;

use crate::errors::{LcshmError, Result};

use super::sysv;

/// Host-wide semaphore name; 22 characters, inside the 23+NUL budget.
const SEM_NAME_HOST: &str = "MacromediaSemaphoreDig";
/// Per-user names append the uid in fixed-width hex to stay in budget.
const SEM_NAME_USER_PREFIX: &str = "MacromediaSem";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub sem: String,
    pub shm: libc::key_t,
}

pub(super) fn keys(is_per_user: bool) -> Keys {
    let sem = if is_per_user {
        let uid = unsafe { libc::getuid() };
        format!("{SEM_NAME_USER_PREFIX}{uid:08x}")
    } else {
        SEM_NAME_HOST.to_owned()
    };
    Keys {
        sem,
        shm: sysv::segment_key(is_per_user),
    }
}

pub(super) struct Raw {
    sem: *mut libc::sem_t,
    #[allow(dead_code)]
    shmid: libc::c_int,
    addr: *mut libc::c_void,
}

// SAFETY: the semaphore descriptor and segment pointer are process-local
// views of kernel objects; moving them between threads is fine. Region
// access is synchronized by the semaphore plus `&mut` on the channel.
unsafe impl Send for Raw {}

pub(super) fn open(is_per_user: bool) -> Result<Raw> {
    let keys = keys(is_per_user);
    let name = CString::new(keys.sem)
        .map_err(|_| LcshmError::Unavailable(io::Error::other("NUL in semaphore name")))?;

    // Counting semaphore initialized to 1, so the first lock acquires
    // without blocking. O_CREAT without O_EXCL: an existing semaphore
    // keeps its current value.
    let sem = unsafe {
        libc::sem_open(
            name.as_ptr(),
            libc::O_CREAT,
            0o666 as libc::c_uint,
            1 as libc::c_uint,
        )
    };
    if sem == libc::SEM_FAILED {
        return Err(LcshmError::Unavailable(io::Error::last_os_error()));
    }

    let (shmid, addr) = match sysv::attach_segment(keys.shm) {
        Ok(pair) => pair,
        Err(e) => {
            unsafe { libc::sem_close(sem) };
            return Err(e);
        }
    };

    Ok(Raw { sem, shmid, addr })
}

impl Raw {
    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.addr.cast()
    }

    pub(super) fn lock(&self) -> Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            if Errno::last() != Errno::EINTR {
                return Err(LcshmError::LockLost(io::Error::last_os_error()));
            }
        }
    }

    pub(super) fn try_lock(&self) -> Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EAGAIN => return Ok(false),
                Errno::EINTR => continue,
                _ => return Err(LcshmError::LockLost(io::Error::last_os_error())),
            }
        }
    }

    pub(super) fn unlock(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(LcshmError::LockLost(io::Error::last_os_error()))
        }
    }
}

impl Drop for Raw {
    fn drop(&mut self) {
        // Close the local descriptor and detach; never unlink the
        // semaphore or remove the segment.
        unsafe {
            libc::sem_close(self.sem);
            libc::shmdt(self.addr);
        }
    }
}
