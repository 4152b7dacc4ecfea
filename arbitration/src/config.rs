//! Arbiter configuration
//!
//! Layers, lowest precedence first: [`ArbiterConfig::default`], an optional
//! TOML file, then `ARBITER_*` environment variables. The binary applies CLI
//! flags on top and calls [`ArbiterConfig::validate`] before starting.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Approach, SeverityScale};

/// Upper bound on the loop's poll interval, i.e. the preemption latency bound.
pub const MAX_POLL_INTERVAL_MS: u64 = 500;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Default two-phase rotation used while no claims are pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub corridor_a: Approach,
    pub corridor_b: Approach,
    /// How long corridor A stays open
    pub corridor_a_ms: u64,
    /// How long corridor B stays open
    pub corridor_b_ms: u64,
    /// All-stop transition gap between open phases
    pub gap_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            corridor_a: Approach::new("signal-1"),
            corridor_b: Approach::new("signal-2"),
            corridor_a_ms: 3_000,
            corridor_b_ms: 3_000,
            gap_ms: 1_000,
        }
    }
}

/// Top-level arbiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Maximum time a claim holds the corridor uninterrupted
    pub hold_window_ms: u64,
    /// Longest the loop sleeps without re-evaluating
    pub poll_interval_ms: u64,
    /// Whether a rescan by the current holder resets the hold window
    pub renew_on_rescan: bool,
    /// Accepted severity range (higher = more urgent)
    pub severity: SeverityScale,
    /// Pending cases older than this are evicted (0 disables)
    pub case_ttl_secs: u64,
    /// Time budget for a single actuator command
    pub actuator_timeout_ms: u64,
    /// Approach granted to claims that were not scanned on a specific one
    pub default_approach: Approach,
    pub cycle: CycleConfig,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            hold_window_ms: 10_000,
            poll_interval_ms: 250,
            renew_on_rescan: false,
            severity: SeverityScale::default(),
            case_ttl_secs: 1_800,
            actuator_timeout_ms: 250,
            default_approach: Approach::new("signal-2"),
            cycle: CycleConfig::default(),
        }
    }
}

impl ArbiterConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value,
                })
        }

        if let Some(v) = lookup("ARBITER_HOLD_WINDOW_MS") {
            self.hold_window_ms = parse("ARBITER_HOLD_WINDOW_MS", v)?;
        }
        if let Some(v) = lookup("ARBITER_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse("ARBITER_POLL_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("ARBITER_RENEW_ON_RESCAN") {
            self.renew_on_rescan = parse("ARBITER_RENEW_ON_RESCAN", v)?;
        }
        if let Some(v) = lookup("ARBITER_SEVERITY_MIN") {
            self.severity.min = parse("ARBITER_SEVERITY_MIN", v)?;
        }
        if let Some(v) = lookup("ARBITER_SEVERITY_MAX") {
            self.severity.max = parse("ARBITER_SEVERITY_MAX", v)?;
        }
        if let Some(v) = lookup("ARBITER_CASE_TTL_SECS") {
            self.case_ttl_secs = parse("ARBITER_CASE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("ARBITER_ACTUATOR_TIMEOUT_MS") {
            self.actuator_timeout_ms = parse("ARBITER_ACTUATOR_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("ARBITER_DEFAULT_APPROACH") {
            self.default_approach = Approach::new(v);
        }
        if let Some(v) = lookup("ARBITER_CYCLE_A_MS") {
            self.cycle.corridor_a_ms = parse("ARBITER_CYCLE_A_MS", v)?;
        }
        if let Some(v) = lookup("ARBITER_CYCLE_B_MS") {
            self.cycle.corridor_b_ms = parse("ARBITER_CYCLE_B_MS", v)?;
        }
        if let Some(v) = lookup("ARBITER_CYCLE_GAP_MS") {
            self.cycle.gap_ms = parse("ARBITER_CYCLE_GAP_MS", v)?;
        }
        Ok(())
    }

    /// Reject configurations the arbitration loop cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_window_ms == 0 {
            return Err(ConfigError::Invalid("hold_window_ms must be > 0".into()));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms must be in 1..={}, got {}",
                MAX_POLL_INTERVAL_MS, self.poll_interval_ms
            )));
        }
        if self.severity.min > self.severity.max {
            return Err(ConfigError::Invalid(format!(
                "severity range {}..={} is empty",
                self.severity.min, self.severity.max
            )));
        }
        if self.actuator_timeout_ms == 0 {
            return Err(ConfigError::Invalid("actuator_timeout_ms must be > 0".into()));
        }
        if self.cycle.corridor_a_ms == 0 || self.cycle.corridor_b_ms == 0 {
            return Err(ConfigError::Invalid(
                "default cycle open phases must be > 0".into(),
            ));
        }
        if self.cycle.corridor_a == self.cycle.corridor_b {
            return Err(ConfigError::Invalid(format!(
                "default cycle corridors must differ, both are {}",
                self.cycle.corridor_a
            )));
        }
        Ok(())
    }

    pub fn hold_window(&self) -> Duration {
        Duration::from_millis(self.hold_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_timeout_ms)
    }

    /// Eviction horizon, or `None` when eviction is disabled.
    pub fn case_ttl(&self) -> Option<Duration> {
        (self.case_ttl_secs > 0).then(|| Duration::from_secs(self.case_ttl_secs))
    }
}
