//! Shared-memory LocalConnection channel.
//!
//! Independent processes on the same host rendezvous through one named
//! 64,528-byte shared-memory region, guarded by a named semaphore, to
//! exchange a single framed message (a method name plus an opaque AMF
//! payload) and to publish the set of listening connection names.
//!
//! The crate splits into:
//! - [`shm`]: platform primitives, meaning key derivation, semaphore and
//!   segment lifecycle, and the scoped [`shm::LockedRegion`] guard every
//!   region access goes through;
//! - [`message`]: the single-slot message codec (tick-gated publication,
//!   version-gated fields, 40 KiB cap);
//! - [`registry`]: the capacity-8 connection table;
//! - [`layout`], [`tick`], [`connection`], [`errors`]: the supporting
//!   constants and types.
//!
//! The region layout and field encodings are a compatibility contract with
//! the ActionScript VM's `LocalConnection` facility; none of the offsets or
//! sizes here are tunable.

pub mod connection;
pub mod errors;
pub mod layout;
pub mod message;
pub mod registry;
pub mod shm;
pub mod tick;

pub use connection::{connection_name_valid, AmfVersion, Connection, Sandbox, Version};
pub use errors::{LcshmError, Result};
pub use message::{Envelope, Flags, Message};
pub use shm::{keys, Keys, LockedRegion, ShmChannel};
pub use tick::{nonzero_tick, tick};
