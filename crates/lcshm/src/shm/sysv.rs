//! SysV backend: `semget`/`semop` semaphore and `shmget`/`shmat` segment.
//!
//! The segment handling is shared with the macOS backend, which pairs the
//! same SysV segment with a named POSIX semaphore.

use std::io;
use std::ptr;

#[cfg(not(target_os = "macos"))]
use nix::errno::Errno;
use nix::libc;

use crate::errors::{LcshmError, Result};
use crate::layout;

/// Host-wide SysV key bases for the segment and the semaphore. Per-user
/// scoping adds the uid so each account gets its own rendezvous.
const SHM_KEY_BASE: libc::key_t = 0x5341_4e44;
#[cfg(not(target_os = "macos"))]
const SEM_KEY_BASE: libc::key_t = 0x5345_4d41;

pub(super) fn segment_key(is_per_user: bool) -> libc::key_t {
    scoped_key(SHM_KEY_BASE, is_per_user)
}

fn scoped_key(base: libc::key_t, is_per_user: bool) -> libc::key_t {
    if is_per_user {
        base.wrapping_add(unsafe { libc::getuid() } as libc::key_t)
    } else {
        base
    }
}

fn unavailable() -> LcshmError {
    LcshmError::Unavailable(io::Error::last_os_error())
}

#[cfg(not(target_os = "macos"))]
fn lock_lost() -> LcshmError {
    LcshmError::LockLost(io::Error::last_os_error())
}

/// Open (creating if needed) the segment and attach it. Freshly created
/// SysV segments are zero-filled by the kernel.
pub(super) fn attach_segment(key: libc::key_t) -> Result<(libc::c_int, *mut libc::c_void)> {
    let shmid = unsafe { libc::shmget(key, layout::SIZE, libc::IPC_CREAT | 0o666) };
    if shmid == -1 {
        return Err(unavailable());
    }
    let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(unavailable());
    }
    Ok((shmid, addr))
}

#[cfg(not(target_os = "macos"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keys {
    pub sem: libc::key_t,
    pub shm: libc::key_t,
}

#[cfg(not(target_os = "macos"))]
pub(super) fn keys(is_per_user: bool) -> Keys {
    Keys {
        sem: scoped_key(SEM_KEY_BASE, is_per_user),
        shm: segment_key(is_per_user),
    }
}

#[cfg(not(target_os = "macos"))]
pub(super) struct Raw {
    semid: libc::c_int,
    #[allow(dead_code)]
    shmid: libc::c_int,
    addr: *mut libc::c_void,
}

// SAFETY: the ids are plain kernel handles and the pointer targets
// OS-managed shared memory; moving them between threads is fine. Region
// access is synchronized by the semaphore plus `&mut` on the channel.
#[cfg(not(target_os = "macos"))]
unsafe impl Send for Raw {}

#[cfg(not(target_os = "macos"))]
pub(super) fn open(is_per_user: bool) -> Result<Raw> {
    let keys = keys(is_per_user);

    // Create-exclusive first: a brand new semaphore must be initialized
    // to 1 before anyone can acquire it.
    let created = unsafe {
        libc::semget(
            keys.sem,
            1,
            libc::IPC_CREAT | libc::IPC_EXCL | 0o666,
        )
    };
    let semid = if created != -1 {
        if unsafe { libc::semctl(created, 0, libc::SETVAL, 1) } == -1 {
            return Err(unavailable());
        }
        created
    } else {
        let existing = unsafe { libc::semget(keys.sem, 1, libc::IPC_CREAT | 0o666) };
        if existing == -1 {
            return Err(unavailable());
        }
        existing
    };

    let (shmid, addr) = attach_segment(keys.shm)?;
    Ok(Raw { semid, shmid, addr })
}

#[cfg(not(target_os = "macos"))]
impl Raw {
    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.addr.cast()
    }

    fn semop(&self, op: libc::c_short, flags: libc::c_short) -> libc::c_int {
        let mut buf = libc::sembuf {
            sem_num: 0,
            sem_op: op,
            sem_flg: flags,
        };
        unsafe { libc::semop(self.semid, &mut buf, 1) }
    }

    pub(super) fn lock(&self) -> Result<()> {
        loop {
            if self.semop(-1, libc::SEM_UNDO as libc::c_short) == 0 {
                return Ok(());
            }
            if Errno::last() != Errno::EINTR {
                return Err(lock_lost());
            }
        }
    }

    pub(super) fn try_lock(&self) -> Result<bool> {
        loop {
            if self.semop(-1, (libc::SEM_UNDO | libc::IPC_NOWAIT) as libc::c_short) == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EAGAIN => return Ok(false),
                Errno::EINTR => continue,
                _ => return Err(lock_lost()),
            }
        }
    }

    pub(super) fn unlock(&self) -> Result<()> {
        if self.semop(1, libc::SEM_UNDO as libc::c_short) == 0 {
            Ok(())
        } else {
            Err(lock_lost())
        }
    }
}

#[cfg(not(target_os = "macos"))]
impl Drop for Raw {
    fn drop(&mut self) {
        // Detach only; the segment and semaphore stay for the other
        // participants.
        unsafe {
            libc::shmdt(self.addr);
        }
    }
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(keys(false), keys(false));
        assert_eq!(keys(true), keys(true));
    }

    #[test]
    fn test_host_keys_use_the_bases() {
        let host = keys(false);
        assert_eq!(host.shm, SHM_KEY_BASE);
        assert_eq!(host.sem, SEM_KEY_BASE);
    }
}
