//! Platform primitives: the named semaphore and shared-memory segment
//! behind the channel, and the locked view every region access goes
//! through.
//!
//! One backend per host family, selected at build time:
//! - SysV semaphore + SysV segment on Unix other than macOS;
//! - named POSIX semaphore + SysV segment on macOS;
//! - named mutex + pagefile-backed file mapping on Windows.
//!
//! Each backend derives its keys so that every process on the host (or,
//! with `is_per_user`, every process of the invoking user) lands on the
//! same kernel objects. The kernel objects are deliberately persistent:
//! dropping a [`ShmChannel`] detaches this process but never destroys
//! them, so other participants keep seeing the same region.

#[cfg(target_os = "macos")]
mod macos;
#[cfg(unix)]
mod sysv;
#[cfg(windows)]
mod windows;

#[cfg(target_os = "macos")]
use macos as imp;
#[cfg(all(unix, not(target_os = "macos")))]
use sysv as imp;
#[cfg(windows)]
use windows as imp;

use std::slice;

use crate::connection::Connection;
use crate::errors::Result;
use crate::layout;
use crate::message::{self, Message};
use crate::registry;

pub use imp::Keys;

/// Identifiers for the semaphore and segment shared by every participant.
///
/// The derivation is a compatibility contract, not a free choice; see the
/// backend modules for each platform's scheme.
pub fn keys(is_per_user: bool) -> Keys {
    imp::keys(is_per_user)
}

/// An open channel: the semaphore plus the mapped region.
///
/// Opening creates both kernel objects if this is the first participant;
/// newly created regions are zero-filled, which is exactly the empty
/// channel state (tick 0, no registered connections).
///
/// The handle owns only process-local resources. Sharing one handle
/// between threads requires external synchronization (`lock` takes
/// `&mut self`); separate handles in separate threads or processes
/// synchronize through the semaphore alone.
pub struct ShmChannel {
    raw: imp::Raw,
}

impl ShmChannel {
    /// Open (creating if absent) the semaphore and segment and map the
    /// region. `is_per_user` scopes the rendezvous to the invoking user
    /// instead of the whole host.
    pub fn open(is_per_user: bool) -> Result<Self> {
        Ok(Self {
            raw: imp::open(is_per_user)?,
        })
    }

    /// Block until the region lock is held, then return the locked view.
    ///
    /// The lock is the sole ordering primitive for the region: every read
    /// or write of region bytes happens through the returned guard.
    pub fn lock(&mut self) -> Result<LockedRegion<'_>> {
        self.raw.lock()?;
        Ok(LockedRegion {
            raw: &self.raw,
            released: false,
        })
    }

    /// Non-blocking [`lock`](Self::lock): `None` when another participant
    /// holds the semaphore.
    pub fn try_lock(&mut self) -> Result<Option<LockedRegion<'_>>> {
        if self.raw.try_lock()? {
            Ok(Some(LockedRegion {
                raw: &self.raw,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Exclusive view of the region, released when dropped.
///
/// Guard release in `drop` cannot propagate a failure; callers that need
/// to observe an unlock failure call [`unlock`](Self::unlock) explicitly.
pub struct LockedRegion<'a> {
    raw: &'a imp::Raw,
    released: bool,
}

impl LockedRegion<'_> {
    /// The whole region.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the backend mapped `layout::SIZE` bytes and the mapping
        // lives as long as the channel; the semaphore is held, so no
        // cooperating process mutates the region concurrently.
        unsafe { slice::from_raw_parts(self.raw.as_ptr(), layout::SIZE) }
    }

    /// The whole region, writable.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as `bytes`, plus `&mut self` makes this the only slice
        // handed out by this guard.
        unsafe { slice::from_raw_parts_mut(self.raw.as_ptr(), layout::SIZE) }
    }

    /// Current message tick; 0 when the slot is empty.
    pub fn message_tick(&self) -> u32 {
        message::tick_of(self.bytes())
    }

    /// Read the current message, if any.
    pub fn read_message(&self) -> Result<Option<Message>> {
        message::read(self.bytes())
    }

    /// Publish a message, overwriting any previous one.
    pub fn write_message(&mut self, msg: &Message) -> Result<()> {
        message::write(self.bytes_mut(), msg)
    }

    /// Empty the message slot.
    pub fn clear_message(&mut self) {
        message::clear(self.bytes_mut())
    }

    /// Registered connections, in registration order, as owned copies.
    pub fn connections(&self) -> Result<Vec<Connection>> {
        registry::list(self.bytes())
    }

    /// Register a connection.
    pub fn add_connection(&mut self, connection: &Connection) -> Result<()> {
        registry::add(self.bytes_mut(), connection)
    }

    /// Unregister a connection.
    pub fn remove_connection(&mut self, connection: &Connection) -> Result<()> {
        registry::remove(self.bytes_mut(), connection)
    }

    /// Release the lock, surfacing an OS-level failure as
    /// [`LcshmError::LockLost`](crate::LcshmError::LockLost).
    pub fn unlock(mut self) -> Result<()> {
        self.released = true;
        self.raw.unlock()
    }
}

impl Drop for LockedRegion<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.raw.unlock() {
                tracing::error!("failed to release the channel semaphore: {e}");
            }
        }
    }
}
