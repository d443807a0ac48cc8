//! Error types for latchkit primitives.
//!
//! Every fallible operation in this crate returns [`Error`]. Errors fall into
//! three groups:
//!
//! - **Protocol violations**: the caller used a primitive in the wrong state
//!   (releasing an unlocked lock, settling a settled deferred, resolving a
//!   `Waited` that is not waiting). These are reported synchronously and are
//!   never retried.
//! - **Cancellation**: a pending lazy action was cancelled, or a pending
//!   deferred was discarded by a reset.
//! - **User**: rejection reasons and action failures supplied by the caller.
//!
//! `Error` is cheap to clone so a single rejection can be delivered to every
//! waiter observing the same deferred.

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Protocol violations ===
    /// A deferred was resolved or rejected after it had already settled.
    AlreadySettled,
    /// An operation was attempted in a state that does not allow it.
    InvalidState,
    /// `release` was called on a lock that is not held.
    NotLocked,
    /// An argument was outside its valid range.
    InvalidArgument,

    // === Cancellation ===
    /// A pending operation was cancelled.
    Cancelled,
    /// A pending deferred was discarded before it settled.
    Abandoned,

    // === Configuration ===
    /// Configuration could not be loaded or parsed.
    Config,

    // === User ===
    /// User-provided rejection reason or action failure.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadySettled | Self::InvalidState | Self::NotLocked | Self::InvalidArgument => {
                ErrorCategory::Protocol
            }
            Self::Cancelled | Self::Abandoned => ErrorCategory::Cancellation,
            Self::Config => ErrorCategory::Config,
            Self::User => ErrorCategory::User,
        }
    }

    /// Default message rendered when no explicit message was attached.
    const fn default_message(&self) -> &'static str {
        match self {
            Self::AlreadySettled => "deferred already settled",
            Self::InvalidState => "invalid state for operation",
            Self::NotLocked => "Cannot release an unlocked lock",
            Self::InvalidArgument => "invalid argument",
            Self::Cancelled => "Canceled",
            Self::Abandoned => "pending value abandoned",
            Self::Config => "invalid configuration",
            Self::User => "user error",
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller misuse of a primitive.
    Protocol,
    /// Cancellation or abandonment of pending work.
    Cancellation,
    /// Configuration failures.
    Config,
    /// User-originated errors.
    User,
}

/// The main error type for latchkit operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error reports caller misuse.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Protocol)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the attached message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// A `User` error carrying only a message. Typical rejection reason.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// A `User` error wrapping an arbitrary source error.
    #[must_use]
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// The error delivered to callers waiting on a cancelled action.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    pub(crate) fn already_settled(state: impl fmt::Display) -> Self {
        Self::new(ErrorKind::AlreadySettled).with_message(format!("deferred already {state}"))
    }

    pub(crate) fn invalid_state(op: &str, state: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidState).with_message(format!("cannot {op} while {state}"))
    }

    pub(crate) const fn not_locked() -> Self {
        Self::new(ErrorKind::NotLocked)
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(msg)
    }

    pub(crate) const fn abandoned() -> Self {
        Self::new(ErrorKind::Abandoned)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.kind) {
            (Some(msg), ErrorKind::NotLocked | ErrorKind::Cancelled) => {
                write!(f, "{}: {msg}", self.kind.default_message())
            }
            (Some(msg), _) => f.write_str(msg),
            (None, kind) => f.write_str(kind.default_message()),
        }?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// A specialized Result type for latchkit operations.
pub type Result<T> = std::result::Result<T, Error>;
