//! Command-line arguments and config resolution.

use std::path::PathBuf;

use arbitration::{Approach, ArbiterConfig, ConfigError};
use clap::Parser;

/// Emergency corridor arbiter: reads JSON intake lines on stdin, writes
/// replies and signal commands as JSON lines on stdout.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file (lowest precedence after built-in defaults)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum uninterrupted hold per claim (overrides ARBITER_HOLD_WINDOW_MS)
    #[arg(long)]
    pub hold_window_ms: Option<u64>,

    /// Longest the loop sleeps between evaluations (overrides ARBITER_POLL_INTERVAL_MS)
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Let a rescan by the current holder reset its hold window
    #[arg(long, default_value_t = false)]
    pub renew_on_rescan: bool,

    /// Approach granted when a claim names none (overrides ARBITER_DEFAULT_APPROACH)
    #[arg(long)]
    pub default_approach: Option<String>,

    /// Evict unlinked cases after this many seconds, 0 disables (overrides ARBITER_CASE_TTL_SECS)
    #[arg(long)]
    pub case_ttl_secs: Option<u64>,

    /// Log signal commands only; do not echo them as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    pub quiet_signals: bool,
}

impl Args {
    /// Defaults, then the config file, then `ARBITER_*` variables from
    /// `lookup`, then flags. The result is validated.
    pub fn resolve_config(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ArbiterConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ArbiterConfig::from_file(path)?,
            None => ArbiterConfig::default(),
        };
        config.apply_env(lookup)?;

        if let Some(ms) = self.hold_window_ms {
            config.hold_window_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if self.renew_on_rescan {
            config.renew_on_rescan = true;
        }
        if let Some(approach) = &self.default_approach {
            config.default_approach = Approach::new(approach.clone());
        }
        if let Some(secs) = self.case_ttl_secs {
            config.case_ttl_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}
