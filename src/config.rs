//! Default timings for the throttling actions.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values passed to constructors or set with the
//!    `with_*` methods
//! 2. **Environment variables**: values from `LATCHKIT_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires the
//!    `config-file` feature)
//! 4. **Defaults**: [`ActionConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `LATCHKIT_THROTTLE_INTERVAL_MS` | `u64` | `throttle_interval` |
//! | `LATCHKIT_LAZY_DELAY_MS` | `u64` | `lazy_delay` |
//! | `LATCHKIT_LAZY_DEADLINE_MS` | `u64` | `lazy_deadline` |

use crate::error::{Error, ErrorKind};
use std::time::Duration;

/// Environment variable name for the throttle interval.
pub const ENV_THROTTLE_INTERVAL_MS: &str = "LATCHKIT_THROTTLE_INTERVAL_MS";
/// Environment variable name for the lazy action's settle delay.
pub const ENV_LAZY_DELAY_MS: &str = "LATCHKIT_LAZY_DELAY_MS";
/// Environment variable name for the lazy action's maximum latency.
pub const ENV_LAZY_DEADLINE_MS: &str = "LATCHKIT_LAZY_DEADLINE_MS";

/// Default minimum spacing between throttled executions.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(200);
/// Default settle delay of a lazy action.
pub const DEFAULT_LAZY_DELAY: Duration = Duration::from_millis(5000);
/// Default maximum latency of a lazy action.
pub const DEFAULT_LAZY_DEADLINE: Duration = Duration::from_millis(20000);

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held something other than milliseconds.
    #[error("invalid value for {var}: expected milliseconds, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path as given.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Toml(String),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config).with_source(err)
    }
}

/// Timings used when an action is built without explicit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionConfig {
    /// Minimum spacing between throttled executions.
    pub throttle_interval: Duration,
    /// Quiet period a lazy action waits for after the latest urge.
    pub lazy_delay: Duration,
    /// Upper bound on how long a lazy action may be postponed.
    pub lazy_deadline: Duration,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            lazy_delay: DEFAULT_LAZY_DELAY,
            lazy_deadline: DEFAULT_LAZY_DEADLINE,
        }
    }
}

impl ActionConfig {
    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but is not
    /// an unsigned integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Sets the throttle interval.
    #[must_use]
    pub const fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Sets the lazy settle delay.
    #[must_use]
    pub const fn with_lazy_delay(mut self, delay: Duration) -> Self {
        self.lazy_delay = delay;
        self
    }

    /// Sets the lazy maximum latency.
    #[must_use]
    pub const fn with_lazy_deadline(mut self, deadline: Duration) -> Self {
        self.lazy_deadline = deadline;
        self
    }

    /// Applies the `LATCHKIT_*` variables that are set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] on the first unparseable value;
    /// fields applied before it keep their new values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_THROTTLE_INTERVAL_MS) {
            self.throttle_interval = parse_millis(ENV_THROTTLE_INTERVAL_MS, &val)?;
        }
        if let Some(val) = read_env(ENV_LAZY_DELAY_MS) {
            self.lazy_delay = parse_millis(ENV_LAZY_DELAY_MS, &val)?;
        }
        if let Some(val) = read_env(ENV_LAZY_DEADLINE_MS) {
            self.lazy_deadline = parse_millis(ENV_LAZY_DEADLINE_MS, &val)?;
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_millis(var: &'static str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: val.to_string(),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable action timings.
///
/// ```toml
/// [throttle]
/// interval_ms = 200
///
/// [lazy]
/// delay_ms = 5000
/// deadline_ms = 20000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ActionTomlConfig {
    /// Throttle settings.
    #[serde(default)]
    pub throttle: ThrottleToml,
    /// Lazy action settings.
    #[serde(default)]
    pub lazy: LazyToml,
}

/// `[throttle]` table.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ThrottleToml {
    /// Minimum spacing between executions, in milliseconds.
    pub interval_ms: Option<u64>,
}

/// `[lazy]` table.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LazyToml {
    /// Settle delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Maximum latency in milliseconds.
    pub deadline_ms: Option<u64>,
}

#[cfg(feature = "config-file")]
impl ActionConfig {
    /// Applies the fields present in a parsed TOML config.
    pub fn apply_toml(&mut self, toml: &ActionTomlConfig) {
        if let Some(ms) = toml.throttle.interval_ms {
            self.throttle_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = toml.lazy.delay_ms {
            self.lazy_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = toml.lazy.deadline_ms {
            self.lazy_deadline = Duration::from_millis(ms);
        }
    }

    /// Defaults, then the TOML file at `path`, then environment overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file can not be read or parsed, or an env var is invalid.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_toml(&parse_toml_file(path)?);
        config.apply_env_overrides()?;
        Ok(config)
    }
}

/// Parses a TOML string into an [`ActionTomlConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::Toml`] on syntax or type errors.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<ActionTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Toml(e.to_string()))
}

/// Reads and parses a TOML file into an [`ActionTomlConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file can not be read, or
/// [`ConfigError::Toml`] if it does not parse.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<ActionTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        clean_env_locked();
        result
    }

    fn clean_env_locked() {
        for var in &[ENV_THROTTLE_INTERVAL_MS, ENV_LAZY_DELAY_MS, ENV_LAZY_DEADLINE_MS] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_documented_timings() {
        let config = ActionConfig::default();
        assert_eq!(config.throttle_interval, Duration::from_millis(200));
        assert_eq!(config.lazy_delay, Duration::from_millis(5000));
        assert_eq!(config.lazy_deadline, Duration::from_millis(20000));
    }

    #[test]
    fn parse_millis_trims_whitespace() {
        assert_eq!(
            parse_millis(ENV_LAZY_DELAY_MS, " 150 ").unwrap(),
            Duration::from_millis(150)
        );
        assert!(parse_millis(ENV_LAZY_DELAY_MS, "-1").is_err());
        assert!(parse_millis(ENV_LAZY_DELAY_MS, "1.5").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let config = with_envs(
            &[(ENV_THROTTLE_INTERVAL_MS, "50"), (ENV_LAZY_DEADLINE_MS, "900")],
            ActionConfig::from_env,
        )
        .unwrap();
        assert_eq!(config.throttle_interval, Duration::from_millis(50));
        assert_eq!(config.lazy_delay, DEFAULT_LAZY_DELAY);
        assert_eq!(config.lazy_deadline, Duration::from_millis(900));
    }

    #[test]
    fn unset_env_leaves_defaults() {
        let config = with_envs(&[], ActionConfig::from_env).unwrap();
        assert_eq!(config, ActionConfig::default());
    }

    #[test]
    fn invalid_env_value_is_reported() {
        let err = with_envs(&[(ENV_LAZY_DELAY_MS, "soon")], ActionConfig::from_env).unwrap_err();
        let text = err.to_string();
        assert!(text.contains(ENV_LAZY_DELAY_MS), "{text}");
        assert!(text.contains("soon"), "{text}");

        let wrapped: Error = err.into();
        assert_eq!(wrapped.kind(), ErrorKind::Config);
    }

    #[test]
    fn programmatic_values_win_over_env() {
        let config = with_envs(&[(ENV_THROTTLE_INTERVAL_MS, "50")], || {
            ActionConfig::from_env()
                .map(|c| c.with_throttle_interval(Duration::from_millis(10)))
        })
        .unwrap();
        assert_eq!(config.throttle_interval, Duration::from_millis(10));
    }

    #[cfg(feature = "config-file")]
    mod toml_file {
        use super::*;

        #[test]
        fn parse_full_config() {
            let parsed = parse_toml_str(
                "[throttle]\ninterval_ms = 75\n\n[lazy]\ndelay_ms = 10\ndeadline_ms = 40\n",
            )
            .unwrap();
            let mut config = ActionConfig::default();
            config.apply_toml(&parsed);
            assert_eq!(config.throttle_interval, Duration::from_millis(75));
            assert_eq!(config.lazy_delay, Duration::from_millis(10));
            assert_eq!(config.lazy_deadline, Duration::from_millis(40));
        }

        #[test]
        fn partial_config_keeps_defaults() {
            let parsed = parse_toml_str("[lazy]\ndelay_ms = 10\n").unwrap();
            let mut config = ActionConfig::default();
            config.apply_toml(&parsed);
            assert_eq!(config.lazy_delay, Duration::from_millis(10));
            assert_eq!(config.throttle_interval, DEFAULT_THROTTLE_INTERVAL);
        }

        #[test]
        fn wrong_type_is_an_error() {
            let err = parse_toml_str("[throttle]\ninterval_ms = \"fast\"\n").unwrap_err();
            assert!(matches!(err, ConfigError::Toml(_)));
        }

        #[test]
        fn missing_file_is_an_io_error() {
            let err = parse_toml_file(std::path::Path::new("/nonexistent/latchkit.toml"))
                .unwrap_err();
            assert!(matches!(err, ConfigError::Io { .. }));
        }

        #[test]
        fn env_overrides_file() {
            let path = std::env::temp_dir().join(format!(
                "latchkit-config-{}.toml",
                std::process::id()
            ));
            std::fs::write(&path, "[throttle]\ninterval_ms = 75\n[lazy]\ndelay_ms = 10\n")
                .unwrap();
            let config = with_envs(&[(ENV_LAZY_DELAY_MS, "20")], || ActionConfig::load(&path))
                .unwrap();
            let _ = std::fs::remove_file(&path);
            assert_eq!(config.throttle_interval, Duration::from_millis(75));
            assert_eq!(config.lazy_delay, Duration::from_millis(20));
        }
    }
}
