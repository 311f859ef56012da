use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_TARGET_EFFICIENCY_MPG: f64 = 45.0;
pub const DEFAULT_INCENTIVE_BASELINE: f64 = 1.25;
pub const DEFAULT_INCENTIVE_STEP: f64 = 0.05;
pub const DEFAULT_ACCURACY_THRESHOLD_M: f32 = 12.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// MPG goal offered when the driver picks a destination.
    pub target_efficiency_mpg: f64,
    /// Money-saved total every trip starts from.
    pub incentive_baseline: f64,
    /// Added to the money-saved total on every update that meets the target.
    pub incentive_step: f64,
    /// Location fixes with a worse accuracy (meters) are dropped.
    pub accuracy_threshold_m: f32,
    pub directions: Option<DirectionsConfig>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            target_efficiency_mpg: DEFAULT_TARGET_EFFICIENCY_MPG,
            incentive_baseline: DEFAULT_INCENTIVE_BASELINE,
            incentive_step: DEFAULT_INCENTIVE_STEP,
            accuracy_threshold_m: DEFAULT_ACCURACY_THRESHOLD_M,
            directions: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionsConfig {
    pub api_key: String,
    pub base_url: String,
    pub travel_mode: String,
    pub timeout_secs: u64,
}

impl Default for DirectionsConfig {
    fn default() -> Self {
        DirectionsConfig {
            api_key: String::new(),
            base_url: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
            travel_mode: "driving".to_string(),
            timeout_secs: 10,
        }
    }
}

impl TrackerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: TrackerConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_efficiency_mpg.is_finite() && self.target_efficiency_mpg > 0.0) {
            bail!(
                "`target_efficiency_mpg` must be positive, got {}",
                self.target_efficiency_mpg
            );
        }
        if !(self.incentive_step.is_finite() && self.incentive_step >= 0.0) {
            bail!(
                "`incentive_step` must not be negative, got {}",
                self.incentive_step
            );
        }
        if let Some(directions) = &self.directions {
            if directions.api_key.is_empty() {
                bail!("`directions.api_key` is required when `directions` is set");
            }
        }
        Ok(())
    }
}
