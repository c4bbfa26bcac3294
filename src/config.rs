//! Simulation configuration record and its bounds validation.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::model::Velocity;

pub const MAX_WINDOW_DAYS: u32 = 3650;
pub const MAX_DEVELOPERS: u32 = 10_000;
pub const MAX_COMMIT_CAP: u32 = 100_000;

/// Default RNG seed. Runs are reproducible unless the caller supplies their
/// own seed.
pub const DEFAULT_RNG_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Generate a corpus and serve it.
    Runtime,
    /// Generate a corpus for inspection without serving.
    Preview,
    /// Rehydrate a prerecorded corpus. Not available in this build.
    Replay,
}

/// Unit of the history window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    Days,
    Months,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedFormat {
    Json,
    Toml,
    Tabular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_port")]
    pub port: u16,
    /// History window length, in `window_unit` units, ending now.
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_window_unit")]
    pub window_unit: WindowUnit,
    #[serde(default = "default_velocity")]
    pub velocity: Velocity,
    /// Requested developer headcount; 0 means "use seed cardinality".
    #[serde(default)]
    pub developers: u32,
    /// Per-developer commit cap; 0 means uncapped.
    #[serde(default)]
    pub max_commits: u32,
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default)]
    pub format_hint: Option<SeedFormat>,
}

fn default_mode() -> Mode {
    Mode::Runtime
}

fn default_port() -> u16 {
    8787
}

fn default_days() -> u32 {
    30
}

fn default_window_unit() -> WindowUnit {
    WindowUnit::Days
}

fn default_velocity() -> Velocity {
    Velocity::Medium
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            mode: default_mode(),
            port: default_port(),
            days: default_days(),
            window_unit: default_window_unit(),
            velocity: default_velocity(),
            developers: 0,
            max_commits: 0,
            rng_seed: None,
            format_hint: None,
        }
    }
}

impl SimConfig {
    /// Window length normalized to days.
    pub fn effective_days(&self) -> u32 {
        match self.window_unit {
            WindowUnit::Days => self.days,
            WindowUnit::Months => self.days.saturating_mul(30),
        }
    }

    pub fn effective_rng_seed(&self) -> u64 {
        self.rng_seed.unwrap_or(DEFAULT_RNG_SEED)
    }

    pub fn validate(&self) -> SimResult<()> {
        let days = self.effective_days();
        if days == 0 || days > MAX_WINDOW_DAYS {
            return Err(SimError::InvalidConfig(format!(
                "days must be in [1, {}], got {}",
                MAX_WINDOW_DAYS, days
            )));
        }
        if self.developers > MAX_DEVELOPERS {
            return Err(SimError::InvalidConfig(format!(
                "developers must be in [0, {}], got {}",
                MAX_DEVELOPERS, self.developers
            )));
        }
        if self.max_commits > MAX_COMMIT_CAP {
            return Err(SimError::InvalidConfig(format!(
                "max_commits must be in [0, {}], got {}",
                MAX_COMMIT_CAP, self.max_commits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_window() {
        let cfg = SimConfig {
            days: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(SimError::InvalidConfig(_))
        ));

        let cfg = SimConfig {
            days: 200,
            window_unit: WindowUnit::Months,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_oversized_headcount_and_cap() {
        let cfg = SimConfig {
            developers: MAX_DEVELOPERS + 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SimConfig {
            max_commits: MAX_COMMIT_CAP + 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn months_normalize_to_days() {
        let cfg = SimConfig {
            days: 3,
            window_unit: WindowUnit::Months,
            ..Default::default()
        };
        assert_eq!(cfg.effective_days(), 90);
    }

    #[test]
    fn unknown_mode_token_fails_deserialization() {
        let parsed: Result<SimConfig, _> =
            serde_json::from_str(r#"{"mode": "turbo", "days": 7}"#);
        assert!(parsed.is_err());
    }
}
