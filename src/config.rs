use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::image_processing::{DEFAULT_JPEG_QUALITY, MIN_JPEG_QUALITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Reverse-geocoding settings. Defaults match the public Nominatim usage policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub endpoint: String,
    pub zoom: u8,
    /// Lookups issued concurrently per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub accept_language: Option<String>,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/reverse".to_string(),
            zoom: 14,
            batch_size: 5,
            batch_delay_ms: 1000,
            request_timeout_secs: 10,
            user_agent: concat!("photobook-metadata/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: None,
        }
    }
}

impl GeocodingConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pipeline settings, loadable from JSON. Every field is optional in the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time gap that starts a new event
    pub event_gap_minutes: i64,
    /// Quality for the re-encode after an orientation fix
    pub jpeg_quality: u8,
    /// Fail the whole batch on the first unreadable input instead of skipping it
    pub abort_on_read_error: bool,
    /// Resolve place names first so location changes can split events
    pub geocode_before_clustering: bool,
    pub geocoding: GeocodingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_gap_minutes: 180,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            abort_on_read_error: false,
            geocode_before_clustering: false,
            geocoding: GeocodingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_gap_minutes <= 0 {
            return Err(ConfigError::Invalid(format!(
                "event_gap_minutes must be positive, got {}",
                self.event_gap_minutes
            )));
        }
        if !(MIN_JPEG_QUALITY..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be within {}..=100, got {}",
                MIN_JPEG_QUALITY, self.jpeg_quality
            )));
        }
        if self.geocoding.batch_size == 0 {
            return Err(ConfigError::Invalid("geocoding.batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn event_gap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.event_gap_minutes)
    }
}
