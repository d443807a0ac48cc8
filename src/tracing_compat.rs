//! Tracing compatibility layer for structured logging.
//!
//! Primitives log their state transitions (lock grants and hand-offs, timer
//! scheduling, cancellations, failed actions) through this module:
//!
//! - **With `tracing-integration` enabled** (the default): re-exports from the
//!   `tracing` crate.
//! - **Without the feature**: no-op macros that expand to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::tracing_compat::{debug, trace};
//!
//! trace!(waiters = 3, "lock handed to next waiter");
//! debug!(deadline = %deadline, "lazy action scheduled");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
