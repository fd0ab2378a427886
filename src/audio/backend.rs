use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::RecorderError;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels as usize) as u64
    }
}

/// Instantaneous input levels on a linear 0.0..=1.0 amplitude scale
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputLevels {
    /// RMS of the most recent capture buffer
    pub rms: f32,
    /// Absolute peak of the most recent capture buffer
    pub peak: f32,
}

impl InputLevels {
    /// Measure an interleaved i16 buffer
    pub fn measure(samples: &[i16]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sum_sq = 0.0f64;
        let mut peak = 0.0f32;
        for &s in samples {
            let v = s as f32 / 32768.0;
            sum_sq += (v as f64) * (v as f64);
            peak = peak.max(v.abs());
        }

        Self {
            rms: (sum_sq / samples.len() as f64).sqrt() as f32,
            peak,
        }
    }
}

/// Whether the OS granted access to the input device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Granted,
    Denied,
    /// Not asked yet; acquisition may prompt
    Undetermined,
}

/// Audio session category negotiated with the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionCategory {
    /// Input only
    #[default]
    Record,
    /// Input while other output keeps playing
    PlayAndRecord,
}

/// Formats the input hardware can deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputCapabilities {
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl InputCapabilities {
    pub fn supports(&self, sample_rate: u32, channels: u16) -> bool {
        channels >= 1 && channels <= self.max_channels && self.sample_rates.contains(&sample_rate)
    }
}

impl Default for InputCapabilities {
    fn default() -> Self {
        Self {
            sample_rates: vec![8000, 11025, 16000, 22050, 32000, 44100, 48000],
            max_channels: 2,
        }
    }
}

/// What the session asks the hardware for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub channels: u16,
    pub category: SessionCategory,
}

/// Why the OS took the input away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionReason {
    /// Another audio client claimed the hardware (e.g. an incoming call)
    CompetingClient,
    /// The input device disappeared or errored
    DeviceLost,
    /// The capture stream ended on its own
    StreamEnded,
}

/// Push notification from the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Began {
        reason: InterruptionReason,
        /// The OS revoked the hardware; it must be acquired again before capture resumes
        exclusive: bool,
    },
    Ended,
}

/// Audio input backend trait
///
/// Implementations:
/// - `SimulatedBackend`: scriptable in-process device (tests, demo)
/// - `MicrophoneBackend`: cpal default input (feature `microphone`)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Open the input stream
    ///
    /// Returns a channel receiver that will receive audio frames in the
    /// requested format. Fails with `PermissionDenied` or `DeviceUnavailable`.
    async fn open(&self, request: StreamRequest) -> Result<mpsc::Receiver<AudioFrame>, RecorderError>;

    /// Close the input stream. Must be safe to call when not open.
    fn close(&self);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Current microphone permission
    fn permission(&self) -> Permission;

    /// Formats the device supports
    fn capabilities(&self) -> Result<InputCapabilities, RecorderError>;

    /// Levels of the most recent capture buffer
    fn read_levels(&self) -> Result<InputLevels, RecorderError>;

    /// Subscribe to interruption notifications
    fn subscribe_interruptions(&self) -> broadcast::Receiver<Interruption>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
