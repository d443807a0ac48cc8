#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! #[macro_use]
//! mod common;
//! use common::*;
//! ```

use latchkit::time::{TimerDriver, VirtualClock};
use latchkit::types::Time;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED5EED;

const PROPTEST_SEED_ENV: &str = "LATCHKIT_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
///
/// An explicit `PROPTEST_RNG_SEED` wins; otherwise `LATCHKIT_PROPTEST_SEED`,
/// then a fixed seed when `CI` is set.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// A waker that does nothing when woken.
#[must_use]
pub fn noop_waker() -> Waker {
    Arc::new(NoopWaker).into()
}

/// Polls a future once with a no-op waker.
pub fn poll_once<F>(fut: &mut F) -> Poll<F::Output>
where
    F: Future + Unpin,
{
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    Pin::new(fut).poll(&mut cx)
}

/// Virtual clock plus timer driver, advanced explicitly by the test.
#[derive(Debug, Clone)]
pub struct TestTimer {
    pub clock: Arc<VirtualClock>,
    pub driver: Arc<TimerDriver<VirtualClock>>,
}

impl TestTimer {
    #[must_use]
    pub fn new() -> Self {
        let clock = Arc::new(VirtualClock::new());
        let driver = Arc::new(TimerDriver::with_clock(Arc::clone(&clock)));
        Self { clock, driver }
    }

    /// Moves the clock to `millis` after the epoch and fires due timers.
    ///
    /// Returns the number of callbacks fired.
    pub fn advance_to_millis(&self, millis: u64) -> usize {
        self.clock.advance_to(Time::from_millis(millis));
        self.driver.process_timers()
    }

    /// Advances one millisecond at a time up to `millis`, firing timers at
    /// every step.
    pub fn step_to_millis(&self, millis: u64) -> usize {
        let mut fired = 0;
        let mut now = self.clock_millis();
        while now < millis {
            now += 1;
            fired += self.advance_to_millis(now);
        }
        fired
    }

    #[must_use]
    pub fn clock_millis(&self) -> u64 {
        self.driver.now().as_millis()
    }
}

impl Default for TestTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
