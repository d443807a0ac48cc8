//! Time sources and timer services.
//!
//! The throttling primitives never read the clock or sleep directly. They go
//! through the [`Timer`] trait, which pairs a clock with one-shot callback
//! scheduling:
//!
//! - [`TimerDriver`]: callbacks fire when the owner calls
//!   [`process_timers`](TimerDriver::process_timers). With a [`VirtualClock`]
//!   this makes time-dependent code deterministic under test.
//! - [`TimerThread`]: a background thread firing callbacks at monotonic
//!   wall-clock deadlines.
//!
//! # Monotonic vs Wall Time
//!
//! [`WallClock`] is built on `std::time::Instant`. Deadlines computed from it
//! are unaffected by system clock adjustments.
//!
//! # Example
//!
//! ```
//! use latchkit::time::{Timer, TimerThread};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let timer = TimerThread::spawn().unwrap();
//! let (tx, rx) = mpsc::channel();
//! timer.schedule(timer.now() + Duration::from_millis(5), Box::new(move || tx.send(()).unwrap()));
//! rx.recv_timeout(Duration::from_secs(1)).unwrap();
//! ```

mod driver;
mod thread;

pub use driver::{
    TimeSource, Timer, TimerCallback, TimerDriver, TimerHandle, VirtualClock, WallClock,
};
pub use thread::TimerThread;
