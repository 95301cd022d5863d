//! Configuration handling.

use crate::error::{HmmError, Result};
use crate::models::MIN_SAMPLES;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trainer: TrainerConfig,
    pub decoder: DecoderConfig,
}

/// Baum-Welch training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Maximum number of EM iterations
    pub max_iterations: usize,
    /// Relative log-likelihood change below which training stops
    pub tolerance: f64,
    /// Re-estimate the entry row (initial distribution) of each net
    pub update_init: bool,
    /// Re-estimate transitions out of emitting states
    pub update_trans: bool,
    /// Minimum posterior mass a net needs to be re-estimated
    pub min_samples: f64,
    /// Lower bound on re-estimated transition probabilities of allowed arcs
    pub transition_floor: f64,
    /// Accumulate statistics over sequences in parallel
    pub parallel: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-4,
            update_init: true,
            update_trans: true,
            min_samples: MIN_SAMPLES,
            transition_floor: 1e-8,
            parallel: true,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tolerance < 0.0 || self.tolerance.is_nan() {
            return Err(HmmError::Config(format!("tolerance must be >= 0, got {}", self.tolerance)));
        }
        if !(self.min_samples >= 0.0) {
            return Err(HmmError::Config(format!(
                "min_samples must be >= 0, got {}",
                self.min_samples
            )));
        }
        if !(0.0..1.0).contains(&self.transition_floor) {
            return Err(HmmError::Config(format!(
                "transition_floor must be in [0, 1), got {}",
                self.transition_floor
            )));
        }
        Ok(())
    }
}

/// Search graph and Viterbi configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Nets allowed to follow each net; every net may follow every net when unset
    pub follow: Option<HashMap<String, Vec<String>>>,
    /// Log weight added on every net-to-net junction
    pub junction_log_weight: f64,
}

impl Config {
    /// Load configuration from file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.trainer.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
