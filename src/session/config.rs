use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioFormat, AudioQuality, EncoderSpec, InputCapabilities, SessionCategory, StreamRequest};
use crate::error::RecorderError;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_METERING_INTERVAL_MS: u64 = 250;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;
/// Upper bound for the metering and progress intervals
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Configuration for one recording, immutable once the session starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Destination file
    pub path: PathBuf,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Container + codec of the file
    pub format: AudioFormat,

    /// Audio session category negotiated with the OS
    pub category: SessionCategory,

    /// Emit metering events while recording
    pub metering_enabled: bool,

    /// Metering cadence
    /// Default: 250ms
    pub metering_interval_ms: u64,

    /// Progress cadence
    /// Default: 1000ms
    pub progress_interval_ms: u64,
}

impl RecordingConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: AudioFormat::default(),
            category: SessionCategory::default(),
            metering_enabled: true,
            metering_interval_ms: DEFAULT_METERING_INTERVAL_MS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }

    /// Use the compressed format behind a quality preset
    pub fn with_quality(mut self, quality: AudioQuality) -> Self {
        self.format = quality.format();
        self
    }

    pub fn metering_interval(&self) -> Duration {
        Duration::from_millis(self.metering_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            sample_rate: self.sample_rate,
            channels: self.channels,
            category: self.category,
        }
    }

    pub fn encoder_spec(&self) -> EncoderSpec {
        EncoderSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format,
        }
    }

    /// Check values against what the hardware supports. `capabilities` is
    /// None when the device could not be queried; only basic checks run then.
    pub fn validate(&self, capabilities: Option<&InputCapabilities>) -> Result<(), RecorderError> {
        let invalid = |msg: String| Err(RecorderError::InvalidConfig(msg));

        if self.path.as_os_str().is_empty() {
            return invalid("output path is empty".to_string());
        }
        if self.path.is_dir() {
            return invalid(format!("{} is a directory", self.path.display()));
        }
        if self.sample_rate == 0 {
            return invalid("sample rate must be positive".to_string());
        }
        if self.channels == 0 {
            return invalid("channel count must be positive".to_string());
        }
        if self.metering_interval_ms == 0 || self.metering_interval_ms > MAX_INTERVAL_MS {
            return invalid(format!(
                "metering interval must be between 1 and {} ms",
                MAX_INTERVAL_MS
            ));
        }
        if self.progress_interval_ms == 0 || self.progress_interval_ms > MAX_INTERVAL_MS {
            return invalid(format!(
                "progress interval must be between 1 and {} ms",
                MAX_INTERVAL_MS
            ));
        }

        if let Some(capabilities) = capabilities {
            if !capabilities.supports(self.sample_rate, self.channels) {
                return invalid(format!(
                    "{}Hz x {} channels is not supported by the input (rates {:?}, up to {} channels)",
                    self.sample_rate, self.channels, capabilities.sample_rates, capabilities.max_channels
                ));
            }
        }

        Ok(())
    }
}
