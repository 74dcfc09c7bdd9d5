//! Concurrency control module.
//!
//! Connections coordinate only through the per-file lock table in [`lock`]
//! and the change counter stored in the header page. There is no message
//! passing between connections.

pub mod lock;

pub use lock::{FileLock, HolderId, LockLevel, LockState};
