//! Externally resolvable single-settlement values.
//!
//! A [`Deferred`] is a future whose outcome is decided by whoever holds its
//! resolve/reject capability rather than by the code that awaits it. It
//! settles exactly once: the first of `resolve` or `reject` wins and every
//! later attempt fails with [`ErrorKind::AlreadySettled`](crate::ErrorKind).
//!
//! Observers await a [`Promise`], a cheap cloneable handle. Every promise of
//! the same deferred yields a clone of the same outcome.
//!
//! # Example
//!
//! ```
//! use latchkit::sync::Deferred;
//!
//! let deferred = Deferred::new();
//! let promise = deferred.promise();
//!
//! deferred.resolve(1).unwrap();
//! assert!(deferred.resolve(2).is_err());
//!
//! let value = futures_lite::future::block_on(promise).unwrap();
//! assert_eq!(value, 1);
//! ```

use crate::error::{Error, Result};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Settlement state of a deferred value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettleState {
    /// Not yet settled.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

impl SettleState {
    /// Returns `true` unless pending.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for SettleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Resolved => f.write_str("resolved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// Slab of registered wakers that reuses freed slots, so promises that are
/// polled and dropped repeatedly do not grow the storage.
#[derive(Debug, Default)]
struct WaiterSlab {
    entries: Vec<Option<Waker>>,
    free_slots: Vec<usize>,
}

impl WaiterSlab {
    fn insert(&mut self, waker: Waker) -> usize {
        if let Some(index) = self.free_slots.pop() {
            self.entries[index] = Some(waker);
            index
        } else {
            self.entries.push(Some(waker));
            self.entries.len() - 1
        }
    }

    fn update(&mut self, index: usize, waker: &Waker) {
        if let Some(slot) = self.entries.get_mut(index) {
            match slot {
                Some(existing) if existing.will_wake(waker) => {}
                _ => *slot = Some(waker.clone()),
            }
        }
    }

    fn remove(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }
        self.entries[index] = None;
        self.free_slots.push(index);

        // Shrink from the end while the tail is free.
        while self.entries.last().is_some_and(Option::is_none) {
            let tail_idx = self.entries.len() - 1;
            self.entries.pop();
            if let Some(pos) = self.free_slots.iter().position(|&i| i == tail_idx) {
                self.free_slots.swap_remove(pos);
            }
        }
    }

    /// Takes every registered waker and empties the slab.
    fn drain(&mut self) -> Vec<Waker> {
        self.free_slots.clear();
        std::mem::take(&mut self.entries).into_iter().flatten().collect()
    }

    fn active_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }
}

#[derive(Debug)]
struct Shared<T> {
    outcome: Option<Result<T>>,
    waiters: WaiterSlab,
}

impl<T> Shared<T> {
    fn state(&self) -> SettleState {
        match self.outcome {
            None => SettleState::Pending,
            Some(Ok(_)) => SettleState::Resolved,
            Some(Err(_)) => SettleState::Rejected,
        }
    }
}

type SharedRef<T> = Arc<Mutex<Shared<T>>>;

fn settle<T>(shared: &SharedRef<T>, outcome: Result<T>) -> Result<()> {
    let wakers = {
        let mut guard = shared.lock();
        if guard.outcome.is_some() {
            return Err(Error::already_settled(guard.state()));
        }
        guard.outcome = Some(outcome);
        trace!(state = %guard.state(), "deferred settled");
        guard.waiters.drain()
    };
    for waker in wakers {
        waker.wake();
    }
    Ok(())
}

/// A single-settlement value resolved from outside.
///
/// Cloning a `Deferred` yields another handle to the same value.
pub struct Deferred<T> {
    shared: SharedRef<T>,
}

impl<T> Deferred<T> {
    /// Creates a pending deferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                outcome: None,
                waiters: WaiterSlab::default(),
            })),
        }
    }

    /// Creates a deferred and runs `executor` immediately with its resolver.
    ///
    /// A rejection issued by the executor is reflected by [`state`](Self::state)
    /// the same way as one issued later from outside.
    #[must_use]
    pub fn with_executor<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let deferred = Self::new();
        executor(deferred.resolver());
        deferred
    }

    /// Returns a cloneable handle carrying the resolve/reject capability.
    #[must_use]
    pub fn resolver(&self) -> Resolver<T> {
        Resolver {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns an awaitable handle observing this deferred.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        Promise {
            shared: Arc::clone(&self.shared),
            waiter_index: None,
        }
    }

    /// Settles with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadySettled`](crate::ErrorKind) if the deferred
    /// already settled; the settled outcome is unchanged.
    pub fn resolve(&self, value: T) -> Result<()> {
        settle(&self.shared, Ok(value))
    }

    /// Settles with the rejection `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadySettled`](crate::ErrorKind) if the deferred
    /// already settled; the settled outcome is unchanged.
    pub fn reject(&self, reason: Error) -> Result<()> {
        settle(&self.shared, Err(reason))
    }

    /// Returns the current settlement state.
    #[must_use]
    pub fn state(&self) -> SettleState {
        self.shared.lock().state()
    }

    /// Returns true if not yet settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == SettleState::Pending
    }

    /// Returns true if settled with a value.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.state() == SettleState::Resolved
    }

    /// Alias of [`is_fulfilled`](Self::is_fulfilled).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.is_fulfilled()
    }

    /// Returns true if settled with an error.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.state() == SettleState::Rejected
    }

    /// Number of promises currently parked on this deferred.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.lock().waiters.active_count()
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Clone> IntoFuture for Deferred<T> {
    type Output = Result<T>;
    type IntoFuture = Promise<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.promise()
    }
}

/// The resolve/reject capability of a [`Deferred`].
pub struct Resolver<T> {
    shared: SharedRef<T>,
}

impl<T> Resolver<T> {
    /// Settles the deferred with `value`. See [`Deferred::resolve`].
    ///
    /// # Errors
    ///
    /// Fails if the deferred already settled.
    pub fn resolve(&self, value: T) -> Result<()> {
        settle(&self.shared, Ok(value))
    }

    /// Settles the deferred with `reason`. See [`Deferred::reject`].
    ///
    /// # Errors
    ///
    /// Fails if the deferred already settled.
    pub fn reject(&self, reason: Error) -> Result<()> {
        settle(&self.shared, Err(reason))
    }

    /// Returns the current settlement state.
    #[must_use]
    pub fn state(&self) -> SettleState {
        self.shared.lock().state()
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.state())
            .finish()
    }
}

/// Future observing the outcome of a [`Deferred`].
///
/// Dropping a pending promise deregisters its waker; the deferred itself is
/// unaffected.
pub struct Promise<T> {
    shared: SharedRef<T>,
    waiter_index: Option<usize>,
}

impl<T> Promise<T> {
    fn settled(outcome: Result<T>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                outcome: Some(outcome),
                waiters: WaiterSlab::default(),
            })),
            waiter_index: None,
        }
    }

    /// A promise that is already resolved with `value`.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// A promise that is already rejected with `reason`.
    #[must_use]
    pub fn rejected(reason: Error) -> Self {
        Self::settled(Err(reason))
    }

    /// Returns the settlement state of the underlying deferred.
    #[must_use]
    pub fn state(&self) -> SettleState {
        self.shared.lock().state()
    }
}

impl<T: Clone> Promise<T> {
    /// Returns the outcome if already settled, without waiting.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T>> {
        self.shared.lock().outcome.clone()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            waiter_index: None,
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("registered", &self.waiter_index.is_some())
            .finish()
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut shared = this.shared.lock();
        if let Some(outcome) = &shared.outcome {
            let outcome = outcome.clone();
            if let Some(index) = this.waiter_index.take() {
                shared.waiters.remove(index);
            }
            return Poll::Ready(outcome);
        }
        match this.waiter_index {
            Some(index) => shared.waiters.update(index, cx.waker()),
            None => this.waiter_index = Some(shared.waiters.insert(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(index) = self.waiter_index.take() {
            self.shared.lock().waiters.remove(index);
        }
    }
}
