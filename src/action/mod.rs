//! Time-windowed execution of a user action.
//!
//! Both actions coalesce many requests into few executions and share each
//! execution's outcome with every caller it covered:
//!
//! - [`ThrottledAction`]: at most one execution per interval. A request inside
//!   the interval is served by one execution at the end of it.
//! - [`LazyAction`]: debounce with a deadline. Execution waits for a quiet
//!   period after the latest request, but never longer than the earliest
//!   request's deadline.
//!
//! Actions never read the clock or sleep themselves; they take an
//! `Arc<dyn Timer>` (see [`crate::time`]). Timer callbacks hold only a weak
//! reference, so dropping the last handle to an action lets its state go
//! even while a timer is outstanding.
//!
//! Callers are grouped into rounds, one [`Waited`] per scheduled execution.
//! A round is detached from the action before its execution starts, so a
//! request made while the action is running joins the next round and is
//! never answered with the outcome of a run that began before it.

mod lazy;
mod throttled;

pub use lazy::{LazyAction, Urge};
pub use throttled::ThrottledAction;

use crate::error::{Error, Result};
use crate::sync::Waited;
use crate::tracing_compat::{debug, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A user action. Cloned out of its slot before every call, so the action may
/// replace itself through `set_action` while running.
pub(crate) type ActionFn<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

/// Runs an action from a timer callback.
///
/// A panic becomes an [`ErrorKind::User`](crate::ErrorKind) error so the
/// round's callers are rejected instead of left waiting.
pub(crate) fn run_caught<T>(action: &ActionFn<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(|| action())).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(panic = %message, "action panicked in timer callback");
        Err(Error::user(format!("action panicked: {message}")))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Settles a detached round with the outcome of its execution.
pub(crate) fn settle_round<T: Clone>(round: &Waited<T>, result: Result<T>) {
    let settled = match result {
        Ok(value) => round.resolve(value),
        Err(err) => {
            warn!(error = %err, "action failed");
            round.reject(err)
        }
    };
    if let Err(err) = settled {
        debug!(error = %err, "round was already settled");
    }
}
