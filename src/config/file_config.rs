use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub regions_file: Option<String>,
    pub metrics_file: Option<String>,

    // Section configs
    pub extract: Option<ExtractConfig>,
    pub schedule: Option<ScheduleConfig>,
    pub metadata: Option<MetadataConfig>,
    pub musicbrainz: Option<MusicBrainzConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExtractConfig {
    pub chart_workers: Option<usize>,
    pub stats_workers: Option<usize>,
    pub item_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stats_request_interval_ms: Option<u64>,
    pub listener_pages: Option<u32>,
    pub load_batch_size: Option<usize>,
    // Retry settings
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub daily_interval_hours: Option<u64>,
    pub metadata_interval_hours: Option<u64>,
    pub tick_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MetadataConfig {
    /// Fail the metadata pipeline instead of skipping it when credentials are missing.
    pub require_credentials: Option<bool>,
    pub inter_batch_delay_ms: Option<u64>,
    pub workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MusicBrainzConfig {
    pub enabled: Option<bool>,
    pub user_agent: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
