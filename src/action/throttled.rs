//! Throttled execution.

use super::{run_caught, settle_round, ActionFn};
use crate::config::ActionConfig;
use crate::error::{Error, Result};
use crate::sync::{Promise, Waited};
use crate::time::{Timer, TimerHandle};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::Time;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct ThrottleState<T> {
    last_executed_at: Option<Time>,
    pending: Option<TimerHandle>,
    /// Callers waiting on the pending execution.
    round: Option<Waited<T>>,
}

impl<T> Default for ThrottleState<T> {
    fn default() -> Self {
        Self {
            last_executed_at: None,
            pending: None,
            round: None,
        }
    }
}

struct Inner<T> {
    timer: Arc<dyn Timer>,
    interval: Duration,
    action: Mutex<ActionFn<T>>,
    state: Mutex<ThrottleState<T>>,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn current_action(&self) -> ActionFn<T> {
        Arc::clone(&*self.action.lock())
    }

    fn run_action(&self) -> Result<T> {
        let action = self.current_action();
        action()
    }

    fn fire(&self) {
        let round = {
            let mut state = self.state.lock();
            state.pending = None;
            state.last_executed_at = Some(self.timer.now());
            state.round.take()
        };
        let result = run_caught(&self.current_action());
        trace!(ok = result.is_ok(), "throttled action executed");
        match round {
            Some(round) => settle_round(&round, result),
            None => debug!("throttled execution had no waiting callers"),
        }
    }
}

/// Runs an action at most once per interval, coalescing callers in between.
///
/// Every [`urge`](Self::urge) made while an execution is pending receives the
/// outcome of that one execution. A failed execution rejects all of them with
/// the same error. An urge made while the action is running waits for the
/// following execution.
///
/// # Example
///
/// ```
/// use latchkit::action::ThrottledAction;
/// use latchkit::time::{TimerDriver, VirtualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(VirtualClock::new());
/// let driver = Arc::new(TimerDriver::with_clock(clock.clone()));
/// let save = ThrottledAction::by_interval(driver.clone(), || Ok("saved"), Duration::from_millis(200));
///
/// let first = save.urge();
/// let second = save.urge();
/// assert!(first.try_get().is_some());
/// assert!(second.try_get().is_none());
///
/// clock.advance_by(Duration::from_millis(200));
/// driver.process_timers();
/// assert_eq!(second.try_get().unwrap().unwrap(), "saved");
/// ```
pub struct ThrottledAction<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> ThrottledAction<T> {
    /// Creates a throttled action with the default interval
    /// ([`ActionConfig::default`]).
    pub fn new<F>(timer: Arc<dyn Timer>, action: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::with_config(timer, action, &ActionConfig::default())
    }

    /// Creates a throttled action using `config.throttle_interval`.
    pub fn with_config<F>(timer: Arc<dyn Timer>, action: F, config: &ActionConfig) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::by_interval(timer, action, config.throttle_interval)
    }

    /// Creates a throttled action that runs at most once per `interval`.
    pub fn by_interval<F>(timer: Arc<dyn Timer>, action: F, interval: Duration) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                timer,
                interval,
                action: Mutex::new(Arc::new(action)),
                state: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    /// Creates a throttled action that runs at most `calls_per_second` times
    /// per second.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind) unless
    /// `calls_per_second` is finite and positive.
    pub fn by_frequency<F>(timer: Arc<dyn Timer>, action: F, calls_per_second: f64) -> Result<Self>
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        if !calls_per_second.is_finite() || calls_per_second <= 0.0 {
            return Err(Error::invalid_argument(format!(
                "frequency must be finite and positive, got {calls_per_second}"
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / calls_per_second)
            .map_err(|e| Error::invalid_argument(e.to_string()))?;
        Ok(Self::by_interval(timer, action, interval))
    }

    /// Returns the minimum spacing between executions.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Replaces the action. A pending execution runs the new one.
    pub fn set_action<F>(&self, action: F) -> &Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        *self.inner.action.lock() = Arc::new(action);
        self
    }

    /// Runs the action now and records the execution time.
    ///
    /// Does not touch a pending execution or its waiters.
    ///
    /// # Errors
    ///
    /// Returns whatever the action returns.
    pub fn execute_immediately(&self) -> Result<T> {
        self.inner.state.lock().last_executed_at = Some(self.inner.timer.now());
        self.inner.run_action()
    }

    /// Requests an execution.
    ///
    /// If more than the interval has passed since the last execution and
    /// none is pending, the action runs now and the returned promise is
    /// already settled. Otherwise an execution is scheduled for the end of
    /// the interval (unless one already is) and the returned promise settles
    /// with its outcome.
    pub fn urge(&self) -> Promise<T> {
        let inner = &self.inner;
        let now = inner.timer.now();
        let mut state = inner.state.lock();

        let elapsed = state
            .last_executed_at
            .map_or(true, |last| now - last > inner.interval);
        if state.pending.is_none() && elapsed {
            state.last_executed_at = Some(now);
            drop(state);
            trace!("throttled action running immediately");
            return match inner.run_action() {
                Ok(value) => Promise::resolved(value),
                Err(err) => {
                    warn!(error = %err, "throttled action failed");
                    Promise::rejected(err)
                }
            };
        }

        let promise = state.round.get_or_insert_with(Waited::new).arm();
        if state.pending.is_none() {
            let deadline = state.last_executed_at.unwrap_or(now) + inner.interval;
            let weak: Weak<Inner<T>> = Arc::downgrade(inner);
            state.pending = Some(inner.timer.schedule(
                deadline,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire();
                    }
                }),
            ));
            debug!(deadline = %deadline, "throttled action scheduled");
        }
        promise
    }

    /// Returns true while an execution is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// Time of the most recent execution, if any.
    #[must_use]
    pub fn last_executed_at(&self) -> Option<Time> {
        self.inner.state.lock().last_executed_at
    }
}

impl<T> Clone for ThrottledAction<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ThrottledAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ThrottledAction")
            .field("interval", &self.inner.interval)
            .field("last_executed_at", &state.last_executed_at)
            .field("pending", &state.pending.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{init_test_logging, VirtualTimer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn counting(timer: &VirtualTimer, interval_ms: u64) -> (ThrottledAction<usize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let action = ThrottledAction::by_interval(
            timer.driver.clone(),
            move || Ok(counter.fetch_add(1, Ordering::SeqCst) + 1),
            Duration::from_millis(interval_ms),
        );
        (action, count)
    }

    #[test]
    fn first_urge_runs_immediately() {
        init_test("first_urge_runs_immediately");
        let timer = VirtualTimer::new();
        let (action, count) = counting(&timer, 200);
        let promise = action.urge();
        let value = promise.try_get().map(|r| r.ok());
        crate::assert_with_log!(value == Some(Some(1)), "settled at once", Some(Some(1usize)), value);
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 1, "one run", 1, count.load(Ordering::SeqCst));
        crate::assert_with_log!(!action.is_pending(), "nothing scheduled", false, action.is_pending());
        crate::test_complete!("first_urge_runs_immediately");
    }

    #[test]
    fn urges_inside_interval_coalesce() {
        init_test("urges_inside_interval_coalesce");
        let timer = VirtualTimer::new();
        let (action, count) = counting(&timer, 200);
        let _ = action.urge();

        let mut promises = Vec::new();
        for ms in (10..200).step_by(10) {
            timer.advance_to_millis(ms);
            promises.push(action.urge());
        }
        crate::assert_with_log!(action.is_pending(), "scheduled", true, action.is_pending());
        timer.advance_to_millis(199);
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 1, "not yet", 1, count.load(Ordering::SeqCst));

        timer.advance_to_millis(200);
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 2, "one more run", 2, count.load(Ordering::SeqCst));
        let all_two = promises
            .iter()
            .all(|p| matches!(p.try_get(), Some(Ok(2))));
        crate::assert_with_log!(all_two, "every caller saw run 2", true, all_two);
        crate::test_complete!("urges_inside_interval_coalesce");
    }

    #[test]
    fn boundary_requires_strictly_more_than_interval() {
        init_test("boundary_requires_strictly_more_than_interval");
        let timer = VirtualTimer::new();
        let (action, count) = counting(&timer, 100);
        let _ = action.urge();
        timer.advance_to_millis(100);
        let at_boundary = action.urge();
        crate::assert_with_log!(at_boundary.try_get().is_none(), "deferred at exactly interval", true, at_boundary.try_get().is_none());
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 1, "single run", 1, count.load(Ordering::SeqCst));
        crate::test_complete!("boundary_requires_strictly_more_than_interval");
    }

    #[test]
    fn failure_rejects_every_coalesced_caller() {
        init_test("failure_rejects_every_coalesced_caller");
        let timer = VirtualTimer::new();
        let action: ThrottledAction<u8> = ThrottledAction::by_interval(
            timer.driver.clone(),
            || Ok(0),
            Duration::from_millis(50),
        );
        let _ = action.urge();
        action.set_action(|| Err(Error::user("disk full")));
        let a = action.urge();
        let b = action.urge();
        timer.advance_to_millis(50);

        let both_failed = [&a, &b].iter().all(|p| {
            matches!(p.try_get(), Some(Err(ref e)) if e.kind() == ErrorKind::User && e.message() == Some("disk full"))
        });
        crate::assert_with_log!(both_failed, "both rejected", true, both_failed);

        crate::test_section!("next window works again");
        action.set_action(|| Ok(9));
        timer.advance_to_millis(200);
        let next = action.urge();
        crate::assert_with_log!(matches!(next.try_get(), Some(Ok(9))), "recovers", "Some(Ok(9))", next.try_get());
        crate::test_complete!("failure_rejects_every_coalesced_caller");
    }

    #[test]
    fn execute_immediately_bypasses_throttle() {
        init_test("execute_immediately_bypasses_throttle");
        let timer = VirtualTimer::new();
        let (action, count) = counting(&timer, 200);
        timer.advance_to_millis(5);
        let _ = action.urge();
        let value = action.execute_immediately().expect("runs");
        crate::assert_with_log!(value == 2, "ran again", 2usize, value);
        let last = action.last_executed_at();
        crate::assert_with_log!(last == Some(Time::from_millis(5)), "timestamp", Some(Time::from_millis(5)), last);
        let deferred = action.urge();
        let waiting = deferred.try_get().is_none();
        crate::assert_with_log!(waiting, "throttled after manual run", true, waiting);
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 2, "no extra run", 2, count.load(Ordering::SeqCst));
        crate::test_complete!("execute_immediately_bypasses_throttle");
    }

    #[test]
    fn by_frequency_validates_and_converts() {
        init_test("by_frequency_validates_and_converts");
        let timer = VirtualTimer::new();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = ThrottledAction::by_frequency(timer.driver.clone(), || Ok(()), bad)
                .err()
                .map(|e| e.kind());
            crate::assert_with_log!(
                err == Some(ErrorKind::InvalidArgument),
                "rejected frequency",
                Some(ErrorKind::InvalidArgument),
                err
            );
        }
        let action = ThrottledAction::by_frequency(timer.driver.clone(), || Ok(()), 4.0)
            .expect("valid frequency");
        crate::assert_with_log!(
            action.interval() == Duration::from_millis(250),
            "4 per second",
            Duration::from_millis(250),
            action.interval()
        );
        crate::test_complete!("by_frequency_validates_and_converts");
    }

    #[test]
    fn urge_during_execution_waits_for_the_next_run() {
        init_test("urge_during_execution_waits_for_the_next_run");
        let timer = VirtualTimer::new();
        let (action, count) = counting(&timer, 100);
        let inside: Arc<Mutex<Option<Promise<usize>>>> = Arc::new(Mutex::new(None));

        let handle = action.clone();
        let slot = Arc::clone(&inside);
        let counter = Arc::clone(&count);
        action.set_action(move || {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if run == 2 {
                *slot.lock() = Some(handle.urge());
            }
            Ok(run)
        });

        let _ = action.urge();
        timer.advance_to_millis(10);
        let outer = action.urge();
        timer.advance_to_millis(100);
        crate::assert_with_log!(matches!(outer.try_get(), Some(Ok(2))), "outer caller got run 2", "Some(Ok(2))", outer.try_get());

        let inner = inside.lock().take().expect("urged while running");
        crate::assert_with_log!(inner.try_get().is_none(), "not answered by the run it interrupted", true, inner.try_get().is_none());
        crate::assert_with_log!(action.is_pending(), "next run scheduled", true, action.is_pending());

        timer.advance_to_millis(200);
        crate::assert_with_log!(matches!(inner.try_get(), Some(Ok(3))), "served by run 3", "Some(Ok(3))", inner.try_get());
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 3, "three runs", 3, count.load(Ordering::SeqCst));
        crate::test_complete!("urge_during_execution_waits_for_the_next_run");
    }

    #[test]
    fn panicking_action_rejects_waiters() {
        init_test("panicking_action_rejects_waiters");
        let timer = VirtualTimer::new();
        let action: ThrottledAction<u8> =
            ThrottledAction::by_interval(timer.driver.clone(), || Ok(1), Duration::from_millis(50));
        let _ = action.urge();
        action.set_action(|| panic!("sensor offline"));
        let waiting = action.urge();
        timer.advance_to_millis(50);

        let outcome = waiting.try_get().map(|r| r.map_err(|e| (e.kind(), e.to_string())));
        let rejected = matches!(&outcome, Some(Err((ErrorKind::User, msg))) if msg.contains("sensor offline"));
        crate::assert_with_log!(rejected, "rejected with panic message", "User: action panicked", outcome);
        crate::assert_with_log!(!action.is_pending(), "nothing left scheduled", false, action.is_pending());
        crate::test_complete!("panicking_action_rejects_waiters");
    }

    #[test]
    fn dropped_action_disarms_timer_callback() {
        init_test("dropped_action_disarms_timer_callback");
        let timer = VirtualTimer::new();
        let (action, count) = counting(&timer, 100);
        let _ = action.urge();
        let pending = action.urge();
        drop(action);
        let fired = timer.advance_to_millis(100);
        crate::assert_with_log!(fired == 1, "callback ran", 1usize, fired);
        crate::assert_with_log!(count.load(Ordering::SeqCst) == 1, "action not run", 1, count.load(Ordering::SeqCst));
        crate::assert_with_log!(pending.try_get().is_none(), "promise stays pending", true, pending.try_get().is_none());
        crate::test_complete!("dropped_action_disarms_timer_callback");
    }
}
