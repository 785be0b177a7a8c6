use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub type Number = f32;

pub const EPSILON: Number = 1e-6;

pub const DEFAULT_PATH: &str = "glance_db";
pub const DEFAULT_DIMENSIONS: usize = 1024;
pub const DEFAULT_NEIGHBORS: usize = 3;
pub const CONFIDENCE_THRESHOLD: Number = 0.80;
pub const CAPTURE_PERIOD_MS: u64 = 100;
pub const FRAME_INTERVAL_MS: u64 = 16;
pub const STORAGE_KEY: &str = "glance_model";

#[derive(Deserialize, Default)]
pub struct GlanceConfig {
    pub path: Option<String>,
    pub dimensions: Option<usize>,
    pub neighbors: Option<usize>,
    pub confidence_threshold: Option<Number>,
    pub capture_period_ms: Option<u64>,
    pub frame_interval_ms: Option<u64>,
    pub storage_key: Option<String>,
}

impl GlanceConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(GlanceConfig {
            path: config.get("path").ok(),
            dimensions: config.get("dimensions").ok(),
            neighbors: config.get("neighbors").ok(),
            confidence_threshold: config.get("confidence_threshold").ok(),
            capture_period_ms: config.get("capture_period_ms").ok(),
            frame_interval_ms: config.get("frame_interval_ms").ok(),
            storage_key: config.get("storage_key").ok(),
        })
    }
}

/// Effective runtime settings, resolved from `glance_config.*` and `GLANCE_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub path: PathBuf,
    pub dimensions: usize,
    pub neighbors: usize,
    pub confidence_threshold: Number,
    pub capture_period: Duration,
    pub frame_interval: Duration,
    pub storage_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            dimensions: DEFAULT_DIMENSIONS,
            neighbors: DEFAULT_NEIGHBORS,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            capture_period: Duration::from_millis(CAPTURE_PERIOD_MS),
            frame_interval: Duration::from_millis(FRAME_INTERVAL_MS),
            storage_key: STORAGE_KEY.to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("glance_config").required(false))
            .add_source(Environment::with_prefix("GLANCE").try_parsing(true))
            .build()
            .context("Failed to read glance configuration")?;

        let raw = GlanceConfig::try_from(&config)?;
        Self::resolve(raw)
    }

    pub fn resolve(raw: GlanceConfig) -> Result<Self> {
        let defaults = Self::default();

        let path = raw.path.map(PathBuf::from).unwrap_or(defaults.path);
        let dimensions = raw.dimensions.unwrap_or(defaults.dimensions);
        let neighbors = raw.neighbors.unwrap_or(defaults.neighbors);
        let confidence_threshold = raw
            .confidence_threshold
            .unwrap_or(defaults.confidence_threshold);
        let capture_period_ms = raw.capture_period_ms.unwrap_or(CAPTURE_PERIOD_MS);
        let frame_interval_ms = raw.frame_interval_ms.unwrap_or(FRAME_INTERVAL_MS);
        let storage_key = raw.storage_key.unwrap_or(defaults.storage_key);

        if dimensions == 0 {
            anyhow::bail!("GLANCE_DIMENSIONS must be greater than zero.");
        }
        if neighbors == 0 {
            anyhow::bail!("GLANCE_NEIGHBORS must be greater than zero.");
        }
        if !(confidence_threshold > 0.0 && confidence_threshold <= 1.0) {
            anyhow::bail!(
                "GLANCE_CONFIDENCE_THRESHOLD must be in (0, 1], got {}",
                confidence_threshold
            );
        }
        if capture_period_ms == 0 || frame_interval_ms == 0 {
            anyhow::bail!("Capture period and frame interval must be at least 1ms.");
        }
        if storage_key.trim().is_empty() {
            anyhow::bail!("GLANCE_STORAGE_KEY must not be empty.");
        }

        Ok(Self {
            path,
            dimensions,
            neighbors,
            confidence_threshold,
            capture_period: Duration::from_millis(capture_period_ms),
            frame_interval: Duration::from_millis(frame_interval_ms),
            storage_key,
        })
    }

    pub fn print_config(&self) {
        println!("path={}", self.path.display());
        println!("dimensions={}", self.dimensions);
        println!("neighbors={}", self.neighbors);
        println!("confidence_threshold={}", self.confidence_threshold);
        println!("capture_period_ms={}", self.capture_period.as_millis());
        println!("frame_interval_ms={}", self.frame_interval.as_millis());
        println!("storage_key={}", self.storage_key);
    }
}
