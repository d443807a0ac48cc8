//! FIFO mutual exclusion with explicit release.
//!
//! [`Lock`] is an ownership token rather than a data guard. A caller takes
//! it with [`acquire`](Lock::acquire) and gives it back with
//! [`release`](Lock::release), which may happen from a different task or
//! thread than the one that acquired it.
//!
//! # Fairness
//!
//! `acquire` registers the caller at call time, before the returned future is
//! first polled. Waiters are granted strictly in call order: `release` hands
//! the lock directly to the queue head in the same critical section, so a
//! newcomer can never slip in between.
//!
//! # Cancel Safety
//!
//! The lock belongs to a caller once its [`Acquire`] future completes.
//! Dropping the future before that gives up its place: a queued waiter leaves
//! the queue, and a waiter that was already handed the lock passes it on.
//!
//! # Example
//!
//! ```
//! use latchkit::sync::Lock;
//!
//! let lock = Lock::new();
//! futures_lite::future::block_on(async {
//!     lock.acquire_as("writer").await;
//!     assert_eq!(lock.owner().as_deref(), Some("writer"));
//!     lock.release().unwrap();
//! });
//! assert!(lock.release().is_err());
//! ```

use crate::error::{Error, Result};
use crate::tracing_compat::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

pub(crate) type IdleHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug)]
struct Waiter {
    id: u64,
    owner: Option<String>,
    waker: Option<Waker>,
}

#[derive(Debug, Default)]
struct LockState {
    locked: bool,
    owner: Option<String>,
    /// Pending acquirers in call order.
    waiters: VecDeque<Waiter>,
    /// Acquirers granted the lock whose futures have not completed yet.
    granted: Vec<u64>,
    next_waiter_id: u64,
}

impl LockState {
    fn is_idle(&self) -> bool {
        !self.locked && self.waiters.is_empty()
    }
}

/// A FIFO lock with an optional owner label.
pub struct Lock {
    state: Mutex<LockState>,
    on_idle: Option<IdleHook>,
}

impl Lock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            on_idle: None,
        }
    }

    /// Creates a lock that runs `hook` whenever it becomes idle.
    pub(crate) fn with_idle_hook(hook: IdleHook) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            on_idle: Some(hook),
        }
    }

    /// Requests the lock without an owner label.
    ///
    /// If the lock is free and nobody is queued it is taken immediately and
    /// the returned future completes on first poll. Otherwise the caller is
    /// queued behind every earlier `acquire`.
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            lock: self,
            ticket: self.enqueue(None),
        }
    }

    /// Requests the lock on behalf of `owner`. See [`acquire`](Self::acquire).
    pub fn acquire_as(&self, owner: impl Into<String>) -> Acquire<'_> {
        Acquire {
            lock: self,
            ticket: self.enqueue(Some(owner.into())),
        }
    }

    /// Like [`acquire`](Self::acquire), with a future that owns an `Arc`.
    pub fn acquire_owned(self: &Arc<Self>) -> OwnedAcquire {
        OwnedAcquire {
            ticket: self.enqueue(None),
            lock: Arc::clone(self),
        }
    }

    /// Like [`acquire_as`](Self::acquire_as), with a future that owns an `Arc`.
    pub fn acquire_owned_as(self: &Arc<Self>, owner: impl Into<String>) -> OwnedAcquire {
        OwnedAcquire {
            ticket: self.enqueue(Some(owner.into())),
            lock: Arc::clone(self),
        }
    }

    /// Takes the lock only if it is free and nobody is queued.
    pub fn try_acquire(&self) -> bool {
        self.try_take(None)
    }

    /// Like [`try_acquire`](Self::try_acquire), recording `owner`.
    pub fn try_acquire_as(&self, owner: impl Into<String>) -> bool {
        self.try_take(Some(owner.into()))
    }

    fn try_take(&self, owner: Option<String>) -> bool {
        let mut state = self.state.lock();
        if !state.is_idle() {
            return false;
        }
        state.locked = true;
        trace!(owner = ?owner, "lock taken without waiting");
        state.owner = owner;
        true
    }

    fn enqueue(&self, owner: Option<String>) -> Ticket {
        let mut state = self.state.lock();
        let id = state.next_waiter_id;
        state.next_waiter_id = state.next_waiter_id.wrapping_add(1);
        if state.is_idle() {
            state.locked = true;
            trace!(owner = ?owner, "lock granted immediately");
            state.owner = owner;
            state.granted.push(id);
        } else {
            trace!(owner = ?owner, position = state.waiters.len(), "lock contended, queued");
            state.waiters.push_back(Waiter {
                id,
                owner,
                waker: None,
            });
        }
        Ticket { id, done: false }
    }

    /// Releases the lock and hands it to the longest-waiting acquirer.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotLocked`](crate::ErrorKind) ("Cannot release an
    /// unlocked lock") if the lock is not held.
    pub fn release(&self) -> Result<()> {
        let (next, idle) = {
            let mut state = self.state.lock();
            if !state.locked {
                return Err(Error::not_locked());
            }
            state.owner = None;
            state.locked = false;
            match state.waiters.pop_front() {
                Some(next) => {
                    state.locked = true;
                    state.owner = next.owner;
                    state.granted.push(next.id);
                    trace!(owner = ?state.owner, remaining = state.waiters.len(), "lock handed off");
                    (next.waker, false)
                }
                None => {
                    trace!("lock released, now idle");
                    (None, true)
                }
            }
        };
        if let Some(waker) = next {
            waker.wake();
        }
        if idle {
            self.notify_idle();
        }
        Ok(())
    }

    /// Returns true while held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Returns the current holder's label, if any.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        self.state.lock().owner.clone()
    }

    /// Number of queued acquirers.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns true when unlocked with no one queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    fn notify_idle(&self) {
        if let Some(hook) = &self.on_idle {
            hook();
        }
    }

    fn poll_ticket(&self, ticket: &mut Ticket, cx: &mut Context<'_>) -> Poll<()> {
        if ticket.done {
            return Poll::Ready(());
        }
        let mut state = self.state.lock();
        if let Some(pos) = state.granted.iter().position(|&id| id == ticket.id) {
            state.granted.swap_remove(pos);
            ticket.done = true;
            return Poll::Ready(());
        }
        if let Some(waiter) = state.waiters.iter_mut().find(|w| w.id == ticket.id) {
            match &waiter.waker {
                Some(existing) if existing.will_wake(cx.waker()) => {}
                _ => waiter.waker = Some(cx.waker().clone()),
            }
        }
        Poll::Pending
    }

    fn abandon_ticket(&self, ticket: &Ticket) {
        if ticket.done {
            return;
        }
        let was_granted = {
            let mut state = self.state.lock();
            if let Some(pos) = state.granted.iter().position(|&id| id == ticket.id) {
                state.granted.swap_remove(pos);
                true
            } else {
                if let Some(pos) = state.waiters.iter().position(|w| w.id == ticket.id) {
                    state.waiters.remove(pos);
                    debug!(remaining = state.waiters.len(), "queued acquirer cancelled");
                }
                false
            }
        };
        if was_granted {
            debug!("acquirer cancelled after grant, passing the lock on");
            let _ = self.release();
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lock")
            .field("locked", &state.locked)
            .field("owner", &state.owner)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[derive(Debug)]
struct Ticket {
    id: u64,
    done: bool,
}

/// Future returned by [`Lock::acquire`]; completes once the lock is held.
#[must_use = "the lock is given up if this future is dropped before it completes"]
pub struct Acquire<'a> {
    lock: &'a Lock,
    ticket: Ticket,
}

impl Acquire<'_> {
    /// Returns true if the lock has been granted to this acquirer.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.ticket.done || self.lock.state.lock().granted.contains(&self.ticket.id)
    }
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        this.lock.poll_ticket(&mut this.ticket, cx)
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        self.lock.abandon_ticket(&self.ticket);
    }
}

impl fmt::Debug for Acquire<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// Owning variant of [`Acquire`].
#[must_use = "the lock is given up if this future is dropped before it completes"]
pub struct OwnedAcquire {
    lock: Arc<Lock>,
    ticket: Ticket,
}

impl OwnedAcquire {
    /// Returns the lock this future acquires.
    #[must_use]
    pub fn lock(&self) -> &Arc<Lock> {
        &self.lock
    }
}

impl Future for OwnedAcquire {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        this.lock.poll_ticket(&mut this.ticket, cx)
    }
}

impl Drop for OwnedAcquire {
    fn drop(&mut self) {
        self.lock.abandon_ticket(&self.ticket);
    }
}

impl fmt::Debug for OwnedAcquire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedAcquire")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}
