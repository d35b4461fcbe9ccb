//! Configuration for tradescan.
//!
//! Supports loading from TOML file with CLI argument overrides.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level analysis configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Half-width of the normal range, in standard deviations.
    pub sigma_multiplier: f64,
    /// Quantile of bucket volume above which a bucket is a burst.
    pub volume_quantile: f64,
    /// Width of volume-burst windows, aligned to the epoch.
    pub bucket_minutes: i64,
    /// Run detectors on the rayon pool.
    pub parallel: bool,
    pub log_level: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sigma_multiplier: 2.0,
            volume_quantile: 0.99,
            bucket_minutes: 60,
            parallel: true,
            log_level: "info".to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, sequential: bool, log_level: Option<String>) {
        if sequential {
            self.parallel = false;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sigma_multiplier > 0.0 && self.sigma_multiplier.is_finite()) {
            bail!("sigma_multiplier must be positive, got {}", self.sigma_multiplier);
        }
        if !(0.0..=1.0).contains(&self.volume_quantile) {
            bail!("volume_quantile must be within [0, 1], got {}", self.volume_quantile);
        }
        if self.bucket_minutes <= 0 {
            bail!("bucket_minutes must be positive, got {}", self.bucket_minutes);
        }
        Ok(())
    }
}

/// TOML file structure for deserialization.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralConfig,
    #[serde(default)]
    detection: DetectionToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralConfig {
    log_level: String,
    parallel: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            log_level: defaults.log_level,
            parallel: defaults.parallel,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DetectionToml {
    sigma_multiplier: f64,
    volume_quantile: f64,
    bucket_minutes: i64,
}

impl Default for DetectionToml {
    fn default() -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            sigma_multiplier: defaults.sigma_multiplier,
            volume_quantile: defaults.volume_quantile,
            bucket_minutes: defaults.bucket_minutes,
        }
    }
}

impl From<TomlConfig> for AnalysisConfig {
    fn from(file: TomlConfig) -> Self {
        Self {
            sigma_multiplier: file.detection.sigma_multiplier,
            volume_quantile: file.detection.volume_quantile,
            bucket_minutes: file.detection.bucket_minutes,
            parallel: file.general.parallel,
            log_level: file.general.log_level,
        }
    }
}
