//! Debounced execution with a deadline.
//!
//! A [`LazyAction`] keeps a window across calls to [`urge`](LazyAction::urge):
//!
//! - the *latest delay time*, the running maximum of `now + delay`
//! - the *earliest deadline*, the running minimum of `now + deadline`
//!
//! The action fires at `min(latest delay time, earliest deadline)`. Every
//! urge pushes the quiet period back, but never past the tightest deadline
//! requested so far. Firing, cancelling, or executing synchronously starts a
//! new window.

use super::{run_caught, settle_round, ActionFn};
use crate::config::ActionConfig;
use crate::error::{Error, Result};
use crate::sync::{Promise, Waited};
use crate::time::{Timer, TimerHandle};
use crate::tracing_compat::{debug, trace};
use crate::types::Time;
use parking_lot::Mutex;
use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    handle: TimerHandle,
    generation: u64,
}

struct LazyState<T> {
    /// `None` until the first urge of a window.
    latest_delay_time: Option<Time>,
    /// `None` means no deadline yet.
    earliest_deadline: Option<Time>,
    scheduled: Option<Scheduled>,
    generation: u64,
    last_execute: Option<Time>,
    /// Callers waiting on the scheduled execution.
    round: Option<Waited<T>>,
}

impl<T> Default for LazyState<T> {
    fn default() -> Self {
        Self {
            latest_delay_time: None,
            earliest_deadline: None,
            scheduled: None,
            generation: 0,
            last_execute: None,
            round: None,
        }
    }
}

impl<T> LazyState<T> {
    fn reset_window(&mut self) {
        self.latest_delay_time = None;
        self.earliest_deadline = None;
    }

    fn extend_window(&mut self, delay_time: Time, deadline: Time) -> Time {
        let latest = self
            .latest_delay_time
            .map_or(delay_time, |t| t.max(delay_time));
        let earliest = self.earliest_deadline.map_or(deadline, |t| t.min(deadline));
        self.latest_delay_time = Some(latest);
        self.earliest_deadline = Some(earliest);
        latest.min(earliest)
    }
}

struct Inner<T> {
    timer: Arc<dyn Timer>,
    delay: Duration,
    deadline: Duration,
    action: Mutex<ActionFn<T>>,
    state: Mutex<LazyState<T>>,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn current_action(&self) -> ActionFn<T> {
        Arc::clone(&*self.action.lock())
    }

    fn run_action(&self) -> Result<T> {
        let action = self.current_action();
        action()
    }

    fn fire(&self, generation: u64) {
        let round = {
            let mut state = self.state.lock();
            if state.scheduled.map(|s| s.generation) != Some(generation) {
                trace!(generation, "stale lazy timer ignored");
                return;
            }
            state.scheduled = None;
            state.reset_window();
            state.last_execute = Some(self.timer.now());
            state.round.take()
        };
        trace!("lazy action firing");
        let result = run_caught(&self.current_action());
        match round {
            Some(round) => settle_round(&round, result),
            None => debug!("lazy execution had no waiting callers"),
        }
    }
}

/// What [`LazyAction::urge`] produced.
pub enum Urge<T> {
    /// The window had already closed; the action ran synchronously.
    Ready(T),
    /// The action is scheduled; the promise settles when it runs.
    Pending(Promise<T>),
}

impl<T> Urge<T> {
    /// Returns true if the action already ran.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns the value if the action already ran.
    #[must_use]
    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    /// Converts into a promise, settled already for [`Urge::Ready`].
    #[must_use]
    pub fn into_promise(self) -> Promise<T> {
        match self {
            Self::Ready(value) => Promise::resolved(value),
            Self::Pending(promise) => promise,
        }
    }
}

impl<T> fmt::Debug for Urge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready(..)"),
            Self::Pending(promise) => f.debug_tuple("Pending").field(promise).finish(),
        }
    }
}

impl<T: Clone> IntoFuture for Urge<T> {
    type Output = Result<T>;
    type IntoFuture = Promise<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.into_promise()
    }
}

/// Runs an action once requests go quiet, bounded by a deadline.
///
/// # Example
///
/// ```
/// use latchkit::action::LazyAction;
/// use latchkit::time::{TimerDriver, VirtualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(VirtualClock::new());
/// let driver = Arc::new(TimerDriver::with_clock(clock.clone()));
/// let flush = LazyAction::with_timing(
///     driver.clone(),
///     || Ok(7),
///     Duration::from_millis(100),
///     Duration::from_millis(300),
/// );
///
/// let pending = flush.urge().unwrap().into_promise();
/// clock.advance_by(Duration::from_millis(100));
/// driver.process_timers();
/// assert_eq!(pending.try_get().unwrap().unwrap(), 7);
/// ```
pub struct LazyAction<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> LazyAction<T> {
    /// Creates a lazy action with the default delay and deadline
    /// ([`ActionConfig::default`]).
    pub fn new<F>(timer: Arc<dyn Timer>, action: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::with_config(timer, action, &ActionConfig::default())
    }

    /// Creates a lazy action using `config.lazy_delay` and
    /// `config.lazy_deadline`.
    pub fn with_config<F>(timer: Arc<dyn Timer>, action: F, config: &ActionConfig) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::with_timing(timer, action, config.lazy_delay, config.lazy_deadline)
    }

    /// Creates a lazy action with explicit default timings.
    pub fn with_timing<F>(
        timer: Arc<dyn Timer>,
        action: F,
        delay: Duration,
        deadline: Duration,
    ) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                timer,
                delay,
                deadline,
                action: Mutex::new(Arc::new(action)),
                state: Mutex::new(LazyState::default()),
            }),
        }
    }

    /// Default quiet period.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Default maximum latency.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.inner.deadline
    }

    /// Replaces the action. A scheduled execution runs the new one.
    pub fn set_action<F>(&self, action: F) -> &Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        *self.inner.action.lock() = Arc::new(action);
        self
    }

    /// Requests an execution with the default delay and deadline.
    ///
    /// # Errors
    ///
    /// Only when the action runs synchronously and fails.
    pub fn urge(&self) -> Result<Urge<T>> {
        self.urge_with(self.inner.delay, self.inner.deadline)
    }

    /// Requests an execution no sooner than `delay` from now (unless an
    /// earlier deadline applies) and no later than `deadline` from now.
    ///
    /// When the resulting target time is not in the future, the action runs
    /// synchronously and its value is returned as [`Urge::Ready`]; callers
    /// still waiting on an earlier schedule receive the same outcome.
    /// Otherwise the timer is moved to the new target if it changed and the
    /// shared promise is returned as [`Urge::Pending`].
    ///
    /// # Errors
    ///
    /// Only when the action runs synchronously and fails.
    pub fn urge_with(&self, delay: Duration, deadline: Duration) -> Result<Urge<T>> {
        let inner = &self.inner;
        let now = inner.timer.now();
        let mut state = inner.state.lock();
        let target = state.extend_window(now + delay, now + deadline);

        if target <= now {
            let stale = state.scheduled.take();
            let round = state.round.take();
            state.reset_window();
            state.last_execute = Some(now);
            drop(state);
            if let Some(stale) = stale {
                inner.timer.cancel(stale.handle);
            }
            trace!("lazy action running synchronously");
            let result = inner.run_action();
            if let Some(round) = round {
                settle_round(&round, result.clone());
            }
            return result.map(Urge::Ready);
        }

        let promise = state.round.get_or_insert_with(Waited::new).arm();
        let current = state.scheduled.map(|s| s.handle.deadline());
        if current != Some(target) {
            if let Some(old) = state.scheduled.take() {
                inner.timer.cancel(old.handle);
            }
            state.generation = state.generation.wrapping_add(1);
            let generation = state.generation;
            let weak: Weak<Inner<T>> = Arc::downgrade(inner);
            let handle = inner.timer.schedule(
                target,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire(generation);
                    }
                }),
            );
            state.scheduled = Some(Scheduled { handle, generation });
            debug!(at = %target, "lazy action scheduled");
        }
        Ok(Urge::Pending(promise))
    }

    /// Cancels the scheduled execution and starts a new window.
    ///
    /// Callers waiting on the cancelled execution are rejected with
    /// [`ErrorKind::Cancelled`](crate::ErrorKind). Does nothing beyond
    /// resetting the window when nothing is scheduled.
    pub fn cancel(&self) {
        let (scheduled, round) = {
            let mut state = self.inner.state.lock();
            state.reset_window();
            (state.scheduled.take(), state.round.take())
        };
        if let Some(scheduled) = scheduled {
            self.inner.timer.cancel(scheduled.handle);
            debug!("lazy action cancelled");
        }
        if let Some(round) = round {
            if let Err(err) = round.reject(Error::cancelled()) {
                debug!(error = %err, "cancelled round was already settled");
            }
        }
    }

    /// Runs the action now, leaving any scheduled execution in place.
    ///
    /// # Errors
    ///
    /// Returns whatever the action returns.
    pub fn execute(&self) -> Result<T> {
        self.inner.state.lock().last_execute = Some(self.inner.timer.now());
        self.inner.run_action()
    }

    /// Time since the action last ran, or `None` if it never has.
    #[must_use]
    pub fn since_last_execute(&self) -> Option<Duration> {
        let last = self.inner.state.lock().last_execute?;
        Some(self.inner.timer.now() - last)
    }

    /// Returns when the scheduled execution will run, if one is scheduled.
    #[must_use]
    pub fn scheduled_at(&self) -> Option<Time> {
        self.inner
            .state
            .lock()
            .scheduled
            .map(|s| s.handle.deadline())
    }

    /// Returns true while an execution is scheduled.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_at().is_some()
    }
}

impl<T> Clone for LazyAction<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for LazyAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LazyAction")
            .field("delay", &self.inner.delay)
            .field("deadline", &self.inner.deadline)
            .field("scheduled", &state.scheduled.map(|s| s.handle.deadline()))
            .field("last_execute", &state.last_execute)
            .finish_non_exhaustive()
    }
}
