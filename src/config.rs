use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::{AudioFormat, AudioQuality, SessionCategory, SinkOptions};
use crate::session::{
    RecordingConfig, DEFAULT_CHANNELS, DEFAULT_METERING_INTERVAL_MS, DEFAULT_PROGRESS_INTERVAL_MS,
    DEFAULT_SAMPLE_RATE,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingDefaults,
    pub sink: SinkConfig,
}

/// Defaults applied to every recording started from the CLI
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Directory for recordings given without a path
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Format name, e.g. "wav" or "wav-float"
    pub format: String,
    /// Compressed preset; overrides `format` when set
    pub quality: Option<AudioQuality>,
    pub category: SessionCategory,
    pub metering_enabled: bool,
    pub metering_interval_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: "wav".to_string(),
            quality: None,
            category: SessionCategory::default(),
            metering_enabled: true,
            metering_interval_ms: DEFAULT_METERING_INTERVAL_MS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl RecordingDefaults {
    /// Build a recording config for `path`. Relative paths land in `output_dir`.
    pub fn recording_config(&self, path: impl AsRef<Path>) -> Result<RecordingConfig> {
        let path = path.as_ref();
        let path = if path.is_absolute() || path.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        };

        let format = match self.quality {
            Some(quality) => quality.format(),
            None => self.format.parse::<AudioFormat>()?,
        };

        Ok(RecordingConfig {
            path,
            sample_rate: self.sample_rate,
            channels: self.channels,
            format,
            category: self.category,
            metering_enabled: self.metering_enabled,
            metering_interval_ms: self.metering_interval_ms,
            progress_interval_ms: self.progress_interval_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub queue_capacity: usize,
    pub flush_interval_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        let options = SinkOptions::default();
        Self {
            queue_capacity: options.queue_capacity,
            flush_interval_ms: options.flush_interval.as_millis() as u64,
        }
    }
}

impl SinkConfig {
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            queue_capacity: self.queue_capacity.max(1),
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate knows, optional) and
    /// overlay `AUDIO_RECORDER__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AUDIO_RECORDER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
