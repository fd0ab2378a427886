use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::info;

/// Header-level view of a finished WAV recording
#[derive(Debug, Clone)]
pub struct RecordedFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
    /// Sample frames declared by the header
    pub frame_count: u64,
    /// Samples actually readable from the data chunk
    pub samples_read: u64,
}

impl RecordedFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening recorded file: {}", path.display());

        let mut reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let frame_count = reader.duration() as u64;
        let is_float = spec.sample_format == SampleFormat::Float;

        let counted = if is_float {
            reader
                .samples::<f32>()
                .try_fold(0u64, |count, sample| sample.map(|_| count + 1))
        } else {
            reader
                .samples::<i32>()
                .try_fold(0u64, |count, sample| sample.map(|_| count + 1))
        };
        let samples_read = counted.context("Failed to read audio samples")?;

        let duration_seconds = frame_count as f64 / spec.sample_rate as f64;

        info!(
            "Recorded file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds, spec.sample_rate, spec.channels, samples_read
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            is_float,
            frame_count,
            samples_read,
        })
    }

    /// Header duration agrees with the data actually present
    pub fn is_consistent(&self) -> bool {
        self.frame_count * self.channels as u64 == self.samples_read
    }
}
