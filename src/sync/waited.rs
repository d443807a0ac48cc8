//! Resettable, observable deferred values.
//!
//! A [`Waited`] wraps a [`Deferred`] in a small lifecycle:
//!
//! ```text
//!            reset()                resolve(v)
//!   Init ──────────────► Waiting ─────────────► Resolved
//!                          ▲   │                   │
//!                          │   │ reject(e)         │
//!                          │   └─────────────► Rejected
//!                          │                       │
//!                          └──────── reset() ──────┘
//! ```
//!
//! While waiting, every call to [`wait`](Waited::wait) hands out a promise of
//! the same deferred, so concurrent callers share one outcome. With
//! `auto_reset` the value re-arms itself after each settlement. The actions in
//! [`crate::action`] use one `Waited` per scheduled execution to group the
//! callers it serves.

use super::deferred::{Deferred, Promise};
use crate::error::{Error, Result};
use crate::tracing_compat::{debug, trace};
use parking_lot::Mutex;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Lifecycle state of a [`Waited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitedState {
    /// Never armed.
    Init,
    /// Armed; `resolve` and `reject` are accepted.
    Waiting,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

impl fmt::Display for WaitedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Waiting => f.write_str("waiting"),
            Self::Resolved => f.write_str("resolved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// Options for [`Waited::with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitedOptions {
    /// Re-arm automatically after every settlement.
    pub auto_reset: bool,
    /// Keep the settled result readable after it has been returned once.
    pub keep_result: bool,
}

impl WaitedOptions {
    /// Default options: no auto-reset, results are kept.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            auto_reset: false,
            keep_result: true,
        }
    }

    /// Sets `auto_reset`.
    #[must_use]
    pub const fn auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    /// Sets `keep_result`.
    #[must_use]
    pub const fn keep_result(mut self, keep_result: bool) -> Self {
        self.keep_result = keep_result;
        self
    }
}

impl Default for WaitedOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// What [`Waited::wait`] observed.
pub enum Wait<T> {
    /// Nothing to wait for (never armed, or the result was consumed).
    Idle,
    /// Settlement pending; await the promise.
    Pending(Promise<T>),
    /// Already resolved.
    Ready(T),
}

impl<T> Wait<T> {
    /// Returns true for [`Wait::Idle`].
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true for [`Wait::Pending`].
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns the value if ready.
    #[must_use]
    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the promise if pending.
    #[must_use]
    pub fn into_pending(self) -> Option<Promise<T>> {
        match self {
            Self::Pending(promise) => Some(promise),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Wait<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Pending(promise) => f.debug_tuple("Pending").field(promise).finish(),
            Self::Ready(_) => f.write_str("Ready(..)"),
        }
    }
}

type ResolvedCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type RejectedCallback = Arc<dyn Fn(&Error) + Send + Sync>;

struct Inner<T> {
    state: WaitedState,
    deferred: Option<Deferred<T>>,
    retained: Option<Result<T>>,
}

struct Callbacks<T> {
    on_resolved: Option<ResolvedCallback<T>>,
    on_rejected: Option<RejectedCallback>,
}

/// A resettable deferred with observable lifecycle state.
pub struct Waited<T> {
    inner: Mutex<Inner<T>>,
    callbacks: Mutex<Callbacks<T>>,
    options: WaitedOptions,
}

impl<T> Waited<T> {
    /// Creates a `Waited` in [`WaitedState::Init`] with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(WaitedOptions::new())
    }

    /// Creates a `Waited`; starts in `Waiting` when `auto_reset` is set.
    #[must_use]
    pub fn with_options(options: WaitedOptions) -> Self {
        let waited = Self {
            inner: Mutex::new(Inner {
                state: WaitedState::Init,
                deferred: None,
                retained: None,
            }),
            callbacks: Mutex::new(Callbacks {
                on_resolved: None,
                on_rejected: None,
            }),
            options,
        };
        if options.auto_reset {
            waited.reset();
        }
        waited
    }

    /// Returns the options this value was built with.
    #[must_use]
    pub const fn options(&self) -> WaitedOptions {
        self.options
    }

    /// Installs the callback run after every successful `resolve`.
    pub fn set_on_resolved<F>(&self, callback: F) -> &Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks.lock().on_resolved = Some(Arc::new(callback));
        self
    }

    /// Installs the callback run after every successful `reject`.
    pub fn set_on_rejected<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.callbacks.lock().on_rejected = Some(Arc::new(callback));
        self
    }

    /// Removes both callbacks.
    pub fn clear_callbacks(&self) -> &Self {
        let mut callbacks = self.callbacks.lock();
        callbacks.on_resolved = None;
        callbacks.on_rejected = None;
        drop(callbacks);
        self
    }

    /// Arms a fresh deferred and moves to `Waiting`, whatever the state.
    ///
    /// A still-pending deferred from the previous round is rejected with
    /// [`ErrorKind::Abandoned`](crate::ErrorKind) so nobody awaiting it hangs.
    /// The retained result is dropped unless `keep_result` is set.
    pub fn reset(&self) -> &Self {
        let abandoned = {
            let mut inner = self.inner.lock();
            let previous = inner.deferred.replace(Deferred::new());
            if !self.options.keep_result {
                inner.retained = None;
            }
            trace!(from = %inner.state, "waited reset");
            inner.state = WaitedState::Waiting;
            previous.filter(Deferred::is_pending)
        };
        if let Some(deferred) = abandoned {
            debug!("waited reset abandoned a pending deferred");
            let _ = deferred.reject(Error::abandoned());
        }
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> WaitedState {
        self.inner.lock().state
    }

    /// Returns true while armed.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.state() == WaitedState::Waiting
    }

    /// Returns true once resolved or rejected.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.state(), WaitedState::Resolved | WaitedState::Rejected)
    }

    /// Returns true if resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state() == WaitedState::Resolved
    }

    /// Returns true if rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.state() == WaitedState::Rejected
    }

    /// Returns the pending promise while `Waiting`.
    #[must_use]
    pub fn pending(&self) -> Option<Promise<T>> {
        let inner = self.inner.lock();
        match (inner.state, &inner.deferred) {
            (WaitedState::Waiting, Some(deferred)) => Some(deferred.promise()),
            _ => None,
        }
    }

    /// Returns the pending promise, re-arming first if not waiting.
    pub(crate) fn arm(&self) -> Promise<T> {
        loop {
            if let Some(promise) = self.pending() {
                return promise;
            }
            self.reset();
        }
    }
}

impl<T: Clone> Waited<T> {
    /// Observes the current value.
    ///
    /// - `Init`: [`Wait::Idle`].
    /// - `Waiting`: [`Wait::Pending`] with a promise of the shared deferred.
    /// - `Resolved`: [`Wait::Ready`] with the retained value. Without
    ///   `keep_result` the value is handed out once, then `Wait::Idle`.
    /// - `Rejected`: the rejection reason as `Err`, consumed likewise.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when `Rejected`.
    pub fn wait(&self) -> Result<Wait<T>> {
        let mut inner = self.inner.lock();
        match inner.state {
            WaitedState::Init => Ok(Wait::Idle),
            WaitedState::Waiting => Ok(inner
                .deferred
                .as_ref()
                .map_or(Wait::Idle, |deferred| Wait::Pending(deferred.promise()))),
            WaitedState::Resolved | WaitedState::Rejected => {
                let retained = if self.options.keep_result {
                    inner.retained.clone()
                } else {
                    inner.retained.take()
                };
                match retained {
                    Some(Ok(value)) => Ok(Wait::Ready(value)),
                    Some(Err(reason)) => Err(reason),
                    None => Ok(Wait::Idle),
                }
            }
        }
    }

    /// Returns the retained result without consuming it.
    #[must_use]
    pub fn last_result(&self) -> Option<Result<T>> {
        self.inner.lock().retained.clone()
    }

    /// Resolves the armed deferred with `value`.
    ///
    /// Runs the `on_resolved` callback, then re-arms when `auto_reset` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidState`](crate::ErrorKind) unless `Waiting`;
    /// the state is left unchanged.
    pub fn resolve(&self, value: T) -> Result<()> {
        let deferred = self.settle(Ok(value.clone()))?;
        if let Some(deferred) = deferred {
            let _ = deferred.resolve(value.clone());
        }
        let callback = self.callbacks.lock().on_resolved.clone();
        if let Some(callback) = callback {
            callback(&value);
        }
        if self.options.auto_reset {
            self.reset();
        }
        Ok(())
    }

    /// Rejects the armed deferred with `reason`.
    ///
    /// Runs the `on_rejected` callback, then re-arms when `auto_reset` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidState`](crate::ErrorKind) unless `Waiting`;
    /// the state is left unchanged.
    pub fn reject(&self, reason: Error) -> Result<()> {
        let deferred = self.settle(Err(reason.clone()))?;
        if let Some(deferred) = deferred {
            let _ = deferred.reject(reason.clone());
        }
        let callback = self.callbacks.lock().on_rejected.clone();
        if let Some(callback) = callback {
            callback(&reason);
        }
        if self.options.auto_reset {
            self.reset();
        }
        Ok(())
    }

    fn settle(&self, outcome: Result<T>) -> Result<Option<Deferred<T>>> {
        let mut inner = self.inner.lock();
        let op = if outcome.is_ok() { "resolve" } else { "reject" };
        if inner.state != WaitedState::Waiting {
            return Err(Error::invalid_state(op, inner.state));
        }
        inner.state = if outcome.is_ok() {
            WaitedState::Resolved
        } else {
            WaitedState::Rejected
        };
        inner.retained = Some(outcome);
        trace!(op, "waited settled");
        Ok(inner.deferred.take())
    }
}

impl<T> Default for Waited<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Waited<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waited")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> IntoFuture for &Waited<T> {
    type Output = Result<Option<T>>;
    type IntoFuture = WaitedFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        WaitedFuture {
            observed: Some(self.wait()),
        }
    }
}

/// Future produced by awaiting `&Waited<T>`.
///
/// Resolves to `Ok(None)` when there was nothing to wait for.
pub struct WaitedFuture<T> {
    observed: Option<Result<Wait<T>>>,
}

impl<T> Unpin for WaitedFuture<T> {}

impl<T: Clone> Future for WaitedFuture<T> {
    type Output = Result<Option<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.observed.take() {
            None => Poll::Ready(Ok(None)),
            Some(Err(reason)) => Poll::Ready(Err(reason)),
            Some(Ok(Wait::Idle)) => Poll::Ready(Ok(None)),
            Some(Ok(Wait::Ready(value))) => Poll::Ready(Ok(Some(value))),
            Some(Ok(Wait::Pending(mut promise))) => {
                match Pin::new(&mut promise).poll(cx) {
                    Poll::Ready(outcome) => Poll::Ready(outcome.map(Some)),
                    Poll::Pending => {
                        self.observed = Some(Ok(Wait::Pending(promise)));
                        Poll::Pending
                    }
                }
            }
        }
    }
}

impl<T> fmt::Debug for WaitedFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitedFuture").finish_non_exhaustive()
    }
}
