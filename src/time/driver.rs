//! Time sources and the manually driven timer driver.
//!
//! The driver keeps scheduled callbacks ordered by deadline. Nothing fires on
//! its own: the owner calls [`TimerDriver::process_timers`] from its event
//! loop, which runs every callback whose deadline has passed. Paired with a
//! [`VirtualClock`] this gives fully deterministic tests of time-dependent
//! primitives.

use crate::tracing_compat::trace;
use crate::types::Time;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time source abstraction for getting the current time.
///
/// This trait allows timers to work with both monotonic wall time
/// (production) and virtual time (tests).
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Monotonic time source for production use.
///
/// Uses `std::time::Instant` internally, so system clock adjustments do not
/// move deadlines. The epoch is the time when this source was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let elapsed = self.epoch.elapsed();
        Time::from_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// Virtual time source for testing.
///
/// Time only advances when explicitly told to do so.
///
/// # Example
///
/// ```
/// use latchkit::time::{TimeSource, VirtualClock};
/// use latchkit::types::Time;
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance_by(Duration::from_secs(1));
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by the given number of nanoseconds.
    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, Ordering::Release);
    }

    /// Advances time by a duration.
    pub fn advance_by(&self, by: Duration) {
        self.advance(u64::try_from(by.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Advances time to the given absolute time.
    ///
    /// If the target time is in the past, this is a no-op.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }

    /// Sets the current time.
    pub fn set(&self, time: Time) {
        self.now.store(time.as_nanos(), Ordering::Release);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}

/// A callback run once when its timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    deadline: Time,
}

impl TimerHandle {
    /// Returns the deadline this timer was scheduled for.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }
}

/// A timer service: the `setTimeout` / `clearTimeout` pair the throttling
/// primitives are built on.
pub trait Timer: Send + Sync + fmt::Debug {
    /// Returns the current time on this timer's clock.
    fn now(&self) -> Time;

    /// Schedules `callback` to run once at or after `deadline`.
    fn schedule(&self, deadline: Time, callback: TimerCallback) -> TimerHandle;

    /// Cancels a scheduled timer.
    ///
    /// Returns true if the timer was still pending and will not fire.
    fn cancel(&self, handle: TimerHandle) -> bool;
}

/// Deadline-ordered callback storage shared by the timer implementations.
#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<(Time, u64), TimerCallback>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, deadline: Time, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((deadline, id), callback);
        TimerHandle { id, deadline }
    }

    pub(crate) fn remove(&mut self, handle: TimerHandle) -> bool {
        self.entries.remove(&(handle.deadline, handle.id)).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Time> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every callback due at `now`, earliest first.
    pub(crate) fn drain_expired(&mut self, now: Time) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            expired.push(entry.remove());
        }
        expired
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.entries.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

/// Timer driver fired explicitly by its owner.
///
/// # Example
///
/// ```
/// use latchkit::time::{Timer, TimerDriver, VirtualClock};
/// use latchkit::types::Time;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let clock = Arc::new(VirtualClock::new());
/// let driver = TimerDriver::with_clock(clock.clone());
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// driver.schedule(Time::from_millis(10), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// clock.set(Time::from_millis(10));
/// assert_eq!(driver.process_timers(), 1);
/// assert!(fired.load(Ordering::SeqCst));
/// ```
#[derive(Debug)]
pub struct TimerDriver<C: TimeSource = VirtualClock> {
    clock: Arc<C>,
    queue: Mutex<TimerQueue>,
}

impl<C: TimeSource> TimerDriver<C> {
    /// Creates a new timer driver with the given time source.
    #[must_use]
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self {
            clock,
            queue: Mutex::new(TimerQueue::default()),
        }
    }

    /// Returns the current time from the underlying clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Returns the next deadline that will fire, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.queue.lock().next_deadline()
    }

    /// Runs every callback whose deadline has passed.
    ///
    /// Expired callbacks are collected under the lock and run after it is
    /// released, so a callback may schedule or cancel timers on this driver.
    /// Timers scheduled by a callback fire on a later call.
    ///
    /// Returns the number of callbacks run.
    pub fn process_timers(&self) -> usize {
        let now = self.clock.now();
        let expired = self.queue.lock().drain_expired(now);
        let fired = expired.len();
        if fired > 0 {
            trace!(now = %now, fired, "timer driver firing callbacks");
        }
        for callback in expired {
            callback();
        }
        fired
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if there are no pending timers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Clears all pending timers without firing them.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl TimerDriver<VirtualClock> {
    /// Creates a new timer driver with its own virtual clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(VirtualClock::new()))
    }
}

impl Default for TimerDriver<VirtualClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: TimeSource + fmt::Debug + 'static> Timer for TimerDriver<C> {
    fn now(&self) -> Time {
        Self::now(self)
    }

    fn schedule(&self, deadline: Time, callback: TimerCallback) -> TimerHandle {
        self.queue.lock().insert(deadline, callback)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.queue.lock().remove(handle)
    }
}
