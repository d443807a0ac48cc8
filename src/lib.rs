//! Latchkit: async coordination primitives with explicit time.
//!
//! # Overview
//!
//! Latchkit provides a small cluster of primitives for coordinating callers
//! that run concurrently but must be serialized, coalesced, or deferred:
//!
//! - [`Lock`]: FIFO mutual exclusion. Waiters are served strictly in call
//!   order, and release hands the lock straight to the next waiter.
//! - [`Deferred`]: a value settled from outside exactly once, observed through
//!   cloneable [`Promise`] futures.
//! - [`Waited`]: a resettable deferred with lifecycle state, callbacks, and
//!   optional auto re-arming.
//! - [`ThrottledAction`]: run an action at most once per interval; callers
//!   inside the interval share one execution.
//! - [`LazyAction`]: run an action once requests go quiet, but no later than a
//!   deadline.
//!
//! # Core Guarantees
//!
//! - **Fairness**: lock waiters are granted in `acquire` call order
//! - **Single settlement**: a deferred's first outcome is final
//! - **No hanging waiters**: reset and cancel reject pending promises instead
//!   of dropping them
//! - **Deterministic time**: actions read time only through a [`Timer`], so
//!   tests drive them with a virtual clock
//!
//! # Module Structure
//!
//! - [`sync`]: Deferred, Waited, Lock, and the keyed lock registry
//! - [`action`]: throttled and lazy actions
//! - [`time`]: clocks and timer services
//! - [`types`]: the `Time` instant type
//! - [`config`]: default action timings from env and TOML
//! - [`error`]: error types
//! - [`tracing_compat`]: optional structured logging
//!
//! # Example
//!
//! ```
//! use latchkit::{Deferred, Lock};
//!
//! futures_lite::future::block_on(async {
//!     let lock = Lock::new();
//!     lock.acquire().await;
//!     let done = Deferred::new();
//!     done.resolve("written").unwrap();
//!     lock.release().unwrap();
//!     assert_eq!(done.await.unwrap(), "written");
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod action;
pub mod config;
pub mod error;
pub mod sync;
#[cfg(test)]
pub mod test_utils;
pub mod time;
pub mod tracing_compat;
pub mod types;

pub use action::{LazyAction, ThrottledAction, Urge};
pub use config::{ActionConfig, ConfigError};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use sync::{
    Deferred, Lock, LockRegistry, Promise, Resolver, SettleState, Wait, Waited, WaitedOptions,
    WaitedState,
};
pub use time::{Timer, TimerDriver, TimerHandle, TimerThread, VirtualClock, WallClock};
pub use types::Time;
