// THEORY:
// The `config` module owns everything that is fixed for the duration of a run: the
// edge-case thresholds and the engine's execution settings.
//
// Thresholds are loaded exactly once, validated eagerly, and then shared by value
// across every worker. A bad threshold file is a fatal error for the whole run; it is
// never silently replaced with defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read threshold file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write threshold file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed threshold file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid threshold `{name}` = {value}: {reason}")]
    Invalid {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

/// The three edge-case thresholds. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Longitudinal deceleration limit in m/s². Negative.
    pub hard_brake: f64,
    /// Lateral acceleration magnitude limit in m/s². Positive.
    pub lateral: f64,
    /// Jerk magnitude limit in m/s³. Positive.
    pub jerk: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            hard_brake: -0.8,
            lateral: 0.6,
            jerk: 0.4,
        }
    }
}

impl ThresholdConfig {
    /// Loads and validates a threshold file. Any failure is fatal for the run.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ThresholdConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        self.validate()?;
        // Serializing three finite floats cannot fail.
        let contents = serde_json::to_string_pretty(self).unwrap_or_default();
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check("hard_brake", self.hard_brake, self.hard_brake < 0.0, "must be negative")?;
        check("lateral", self.lateral, self.lateral > 0.0, "must be positive")?;
        check("jerk", self.jerk, self.jerk > 0.0, "must be positive")?;
        Ok(())
    }
}

fn check(name: &'static str, value: f64, ok: bool, reason: &'static str) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::Invalid { name, value, reason: "must be finite" });
    }
    if !ok {
        return Err(ConfigError::Invalid { name, value, reason });
    }
    Ok(())
}

/// Execution settings for a run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of analysis workers.
    pub workers: usize,
    /// Upper bound on frames submitted but not yet handed to the writer.
    pub max_in_flight: usize,
    /// Delay before the single retry of a failed frame write.
    pub write_retry_backoff: Duration,
    /// When false, flagged frames are stored without a thumbnail.
    pub build_panoramas: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_workers(num_cpus::get())
    }
}

impl EngineConfig {
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            max_in_flight: workers * 2,
            write_retry_backoff: Duration::from_millis(100),
            build_panoramas: true,
        }
    }
}
