//! Synchronization primitives under test.

mod lock;

pub use lock::{ExclusiveLock, LockStats};
