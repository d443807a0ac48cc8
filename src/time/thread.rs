//! Background timer thread for production use.
//!
//! [`TimerThread`] owns a single OS thread that sleeps until the earliest
//! scheduled deadline and runs due callbacks on that thread. Deadlines are
//! measured on a monotonic [`WallClock`].

use super::driver::{TimeSource, Timer, TimerCallback, TimerHandle, TimerQueue, WallClock};
use crate::tracing_compat::{debug, error};
use crate::types::Time;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

#[derive(Debug)]
struct Shared {
    clock: WallClock,
    state: Mutex<ThreadState>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
struct ThreadState {
    queue: TimerQueue,
    shutdown: bool,
}

/// A timer service backed by a dedicated thread.
///
/// Callbacks run on the timer thread, one at a time, in deadline order. A
/// panicking callback is logged and does not stop the thread. Dropping the
/// `TimerThread` discards pending timers and joins the thread.
#[derive(Debug)]
pub struct TimerThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl TimerThread {
    /// Spawns the timer thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread could not be spawned.
    pub fn spawn() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            clock: WallClock::new(),
            state: Mutex::new(ThreadState::default()),
            cvar: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("latchkit-timer".into())
            .spawn(move || run(&worker))?;
        let thread_id = handle.thread().id();
        debug!("timer thread started");
        Ok(Self {
            shared,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = shared.clock.now();
        let expired = state.queue.drain_expired(now);
        if !expired.is_empty() {
            drop(state);
            for callback in expired {
                if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!("timer callback panicked");
                }
            }
            state = shared.state.lock();
            continue;
        }
        match state.queue.next_deadline() {
            Some(deadline) => {
                let wait = deadline - now;
                let _ = shared.cvar.wait_for(&mut state, wait);
            }
            None => shared.cvar.wait(&mut state),
        }
    }
    debug!("timer thread stopped");
}

impl Timer for TimerThread {
    fn now(&self) -> Time {
        self.shared.clock.now()
    }

    fn schedule(&self, deadline: Time, callback: TimerCallback) -> TimerHandle {
        let handle = self.shared.state.lock().queue.insert(deadline, callback);
        self.shared.cvar.notify_one();
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.shared.state.lock().queue.remove(handle)
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.queue.clear();
        }
        self.shared.cvar.notify_one();
        // The last owner may be a callback running on the timer thread itself;
        // joining would wait on ourselves.
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
