//! Coordination primitives.
//!
//! # Primitives
//!
//! - [`Deferred`]: a single-settlement value resolved from outside, observed
//!   through cloneable [`Promise`]s
//! - [`Waited`]: a resettable deferred with lifecycle state and callbacks
//! - [`Lock`]: FIFO mutual exclusion with explicit release
//! - [`LockRegistry`]: one shared lock per key, idle entries evicted
//!
//! # Cancel Safety
//!
//! - Dropping a pending [`Promise`] deregisters its waker; the deferred is
//!   unaffected.
//! - Dropping a queued [`Acquire`] removes it from the lock queue.
//! - Dropping an [`Acquire`] that was granted but not yet observed passes the
//!   lock on to the next waiter.
//! - Resetting a [`Waited`] rejects its still-pending deferred so that no
//!   awaiting task hangs.

mod deferred;
mod lock;
mod registry;
mod waited;

pub use deferred::{Deferred, Promise, Resolver, SettleState};
pub use lock::{Acquire, Lock, OwnedAcquire};
pub use registry::LockRegistry;
pub use waited::{Wait, Waited, WaitedFuture, WaitedOptions, WaitedState};
