//! Microphone capture through cpal.
//!
//! cpal streams are not `Send`, so each open stream lives on its own capture
//! thread until `close` signals it to stop.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use parking_lot::Mutex;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{
    AudioBackend, AudioFrame, InputCapabilities, InputLevels, Interruption, InterruptionReason,
    Permission, StreamRequest,
};
use crate::error::RecorderError;

/// Frames queued between the capture callback and the session
const FRAME_QUEUE: usize = 256;

/// Rates checked against the device's supported ranges
const STANDARD_RATES: [u32; 7] = [8000, 11025, 16000, 22050, 32000, 44100, 48000];

fn resolve_device(device_name: Option<&str>) -> Result<cpal::Device, RecorderError> {
    let host = cpal::default_host();

    match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| RecorderError::DeviceUnavailable(format!("failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| RecorderError::DeviceUnavailable(format!("input device not found: {name}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| RecorderError::DeviceUnavailable("no default input device available".to_string())),
    }
}

struct Capture {
    stop: std_mpsc::Sender<()>,
}

struct Shared {
    capture: Mutex<Option<Capture>>,
    levels: Arc<Mutex<InputLevels>>,
    interruptions: broadcast::Sender<Interruption>,
}

/// System microphone input
pub struct MicrophoneBackend {
    device_name: Option<String>,
    display_name: String,
    shared: Arc<Shared>,
}

impl MicrophoneBackend {
    /// `device_name` of `None` uses the system default input
    pub fn new(device_name: Option<String>) -> Self {
        let (interruptions, _) = broadcast::channel(16);
        let display_name = format!(
            "microphone ({})",
            device_name.as_deref().unwrap_or("default")
        );
        Self {
            device_name,
            display_name,
            shared: Arc::new(Shared {
                capture: Mutex::new(None),
                levels: Arc::new(Mutex::new(InputLevels::default())),
                interruptions,
            }),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn open(&self, request: StreamRequest) -> Result<mpsc::Receiver<AudioFrame>, RecorderError> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let device_name = self.device_name.clone();
        let levels = Arc::clone(&self.shared.levels);
        let interruptions = self.shared.interruptions.clone();

        std::thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), request, frame_tx, levels, interruptions) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(RecorderError::DeviceUnavailable(format!(
                        "failed to start input stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until close() or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
                info!("Microphone capture stopped");
            })
            .map_err(|e| RecorderError::Unknown(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.shared.capture.lock() = Some(Capture { stop: stop_tx });
                info!(
                    "Microphone capture started ({}Hz, {} channels)",
                    request.sample_rate, request.channels
                );
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RecorderError::Unknown("capture thread exited during setup".to_string())),
        }
    }

    fn close(&self) {
        if let Some(capture) = self.shared.capture.lock().take() {
            let _ = capture.stop.send(());
        }
    }

    fn is_capturing(&self) -> bool {
        self.shared.capture.lock().is_some()
    }

    fn permission(&self) -> Permission {
        // Desktop hosts report denial only when the stream is opened
        Permission::Undetermined
    }

    fn capabilities(&self) -> Result<InputCapabilities, RecorderError> {
        let device = resolve_device(self.device_name.as_deref())?;
        let ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| RecorderError::DeviceUnavailable(format!("failed to query input configs: {e}")))?
            .collect();

        let sample_rates = STANDARD_RATES
            .iter()
            .copied()
            .filter(|rate| {
                ranges
                    .iter()
                    .any(|r| r.min_sample_rate().0 <= *rate && *rate <= r.max_sample_rate().0)
            })
            .collect();
        let max_channels = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);

        Ok(InputCapabilities {
            sample_rates,
            max_channels,
        })
    }

    fn read_levels(&self) -> Result<InputLevels, RecorderError> {
        if !self.is_capturing() {
            return Err(RecorderError::DeviceUnavailable("input is not open".to_string()));
        }
        Ok(*self.shared.levels.lock())
    }

    fn subscribe_interruptions(&self) -> broadcast::Receiver<Interruption> {
        self.shared.interruptions.subscribe()
    }

    fn name(&self) -> &str {
        &self.display_name
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device_name: Option<&str>,
    request: StreamRequest,
    frames: mpsc::Sender<AudioFrame>,
    levels: Arc<Mutex<InputLevels>>,
    interruptions: broadcast::Sender<Interruption>,
) -> Result<cpal::Stream, RecorderError> {
    let device = resolve_device(device_name)?;
    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let sample_format = device
        .default_input_config()
        .map_err(|e| RecorderError::DeviceUnavailable(format!("failed to get default input config: {e}")))?
        .sample_format();

    let config = StreamConfig {
        channels: request.channels,
        sample_rate: cpal::SampleRate(request.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, frames, levels, interruptions),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, frames, levels, interruptions),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, frames, levels, interruptions),
        other => Err(RecorderError::DeviceUnavailable(format!(
            "unsupported input sample format {other:?}"
        ))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    frames: mpsc::Sender<AudioFrame>,
    levels: Arc<Mutex<InputLevels>>,
    interruptions: broadcast::Sender<Interruption>,
) -> Result<cpal::Stream, RecorderError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let mut captured: u64 = 0;
    let mut overflowed = false;

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|s| s.to_sample::<i16>()).collect();
                *levels.lock() = InputLevels::measure(&samples);

                let frame = AudioFrame {
                    timestamp_ms: captured * 1000 / sample_rate.max(1) as u64,
                    samples,
                    sample_rate,
                    channels,
                };
                captured += frame.frame_count();

                // Never block the audio thread; the session sees the gap as lost buffers
                match frames.try_send(frame) {
                    Ok(()) => overflowed = false,
                    Err(_) if !overflowed => {
                        overflowed = true;
                        warn!("Capture queue full, dropping input buffers");
                    }
                    Err(_) => {}
                }
            },
            move |err| {
                error!("Audio input stream error: {}", err);
                let _ = interruptions.send(Interruption::Began {
                    reason: InterruptionReason::DeviceLost,
                    exclusive: true,
                });
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                RecorderError::DeviceUnavailable("input device disconnected".to_string())
            }
            other => RecorderError::DeviceUnavailable(format!("failed to build input stream: {other}")),
        })
}
