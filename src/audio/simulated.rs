//! In-process input device with a scriptable hardware side.
//!
//! Tests drive it directly (push buffers, fail level reads, raise
//! interruptions); the CLI uses its tone generator when no microphone
//! backend is compiled in.

use parking_lot::Mutex;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::backend::{
    AudioBackend, AudioFrame, InputCapabilities, InputLevels, Interruption, InterruptionReason,
    Permission, StreamRequest,
};
use crate::error::RecorderError;

/// Capture buffer length used by the tone generator
const TONE_BUFFER_MS: u64 = 100;

/// Frames queued between the device and the session
const FRAME_QUEUE: usize = 256;

struct SimState {
    permission: Permission,
    available: bool,
    capabilities: InputCapabilities,
    open_delay: Option<Duration>,
    tone_hz: Option<f32>,
    levels: InputLevels,
    failing_level_reads: u32,
    frame_tx: Option<mpsc::Sender<AudioFrame>>,
    request: Option<StreamRequest>,
    frames_captured: u64,
    generation: u64,
    open_count: u32,
    close_count: u32,
}

struct Inner {
    state: Mutex<SimState>,
    interruptions: broadcast::Sender<Interruption>,
}

/// Scriptable audio input device
#[derive(Clone)]
pub struct SimulatedBackend {
    inner: Arc<Inner>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        let (interruptions, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SimState {
                    permission: Permission::Granted,
                    available: true,
                    capabilities: InputCapabilities::default(),
                    open_delay: None,
                    tone_hz: None,
                    levels: InputLevels::default(),
                    failing_level_reads: 0,
                    frame_tx: None,
                    request: None,
                    frames_captured: 0,
                    generation: 0,
                    open_count: 0,
                    close_count: 0,
                }),
                interruptions,
            }),
        }
    }

    /// Generate a sine tone while open, one buffer every 100ms
    pub fn with_tone(self, hz: f32) -> Self {
        self.inner.state.lock().tone_hz = Some(hz);
        self
    }

    pub fn set_permission(&self, permission: Permission) {
        self.inner.state.lock().permission = permission;
    }

    pub fn set_available(&self, available: bool) {
        self.inner.state.lock().available = available;
    }

    pub fn set_capabilities(&self, capabilities: InputCapabilities) {
        self.inner.state.lock().capabilities = capabilities;
    }

    /// Delay each `open` to model slow hardware negotiation
    pub fn set_open_delay(&self, delay: Duration) {
        self.inner.state.lock().open_delay = Some(delay);
    }

    pub fn set_levels(&self, rms: f32, peak: f32) {
        self.inner.state.lock().levels = InputLevels { rms, peak };
    }

    /// Make the next `count` level reads fail
    pub fn fail_level_reads(&self, count: u32) {
        self.inner.state.lock().failing_level_reads = count;
    }

    /// Deliver one capture buffer. Returns false when the stream is not open
    /// or the session is not keeping up.
    pub fn push_samples(&self, samples: Vec<i16>) -> bool {
        let mut state = self.inner.state.lock();
        push_locked(&mut state, samples)
    }

    /// Deliver a buffer as given, whatever format the stream was opened with
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        match &self.inner.state.lock().frame_tx {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Deliver `frames` sample frames of silence
    pub fn push_silence(&self, frames: usize) -> bool {
        let channels = self
            .inner
            .state
            .lock()
            .request
            .map(|r| r.channels as usize)
            .unwrap_or(1);
        self.push_samples(vec![0; frames * channels])
    }

    /// Raise an OS interruption
    pub fn interrupt(&self, reason: InterruptionReason, exclusive: bool) {
        info!("Simulated interruption: {:?} (exclusive={})", reason, exclusive);
        let _ = self
            .inner
            .interruptions
            .send(Interruption::Began { reason, exclusive });
    }

    pub fn end_interruption(&self) {
        let _ = self.inner.interruptions.send(Interruption::Ended);
    }

    pub fn open_count(&self) -> u32 {
        self.inner.state.lock().open_count
    }

    /// Number of `close` calls that released an open stream
    pub fn close_count(&self) -> u32 {
        self.inner.state.lock().close_count
    }

    fn spawn_tone(&self, hz: f32, generation: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(TONE_BUFFER_MS));
            let mut phase = 0.0f32;
            loop {
                ticker.tick().await;
                let delivered = {
                    let mut state = inner.state.lock();
                    let current = state.generation == generation && state.frame_tx.is_some();
                    match state.request.filter(|_| current) {
                        Some(request) => {
                            let frames = (request.sample_rate as u64 * TONE_BUFFER_MS / 1000) as usize;
                            let step = 2.0 * PI * hz / request.sample_rate as f32;
                            let mut samples = Vec::with_capacity(frames * request.channels as usize);
                            for _ in 0..frames {
                                let value = (phase.sin() * 0.25 * i16::MAX as f32) as i16;
                                phase = (phase + step) % (2.0 * PI);
                                for _ in 0..request.channels {
                                    samples.push(value);
                                }
                            }
                            push_locked(&mut state, samples);
                            true
                        }
                        None => false,
                    }
                };
                if !delivered {
                    break;
                }
            }
            debug!("Tone generator stopped");
        });
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn push_locked(state: &mut SimState, samples: Vec<i16>) -> bool {
    let (Some(tx), Some(request)) = (&state.frame_tx, state.request) else {
        return false;
    };

    let channels = request.channels.max(1) as u64;
    let frame = AudioFrame {
        timestamp_ms: state.frames_captured * 1000 / request.sample_rate.max(1) as u64,
        samples,
        sample_rate: request.sample_rate,
        channels: request.channels,
    };
    let frames = frame.samples.len() as u64 / channels;
    let levels = InputLevels::measure(&frame.samples);

    if tx.try_send(frame).is_err() {
        return false;
    }

    state.frames_captured += frames;
    state.levels = levels;
    true
}

#[async_trait::async_trait]
impl AudioBackend for SimulatedBackend {
    async fn open(&self, request: StreamRequest) -> Result<mpsc::Receiver<AudioFrame>, RecorderError> {
        let delay = self.inner.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (rx, tone) = {
            let mut state = self.inner.state.lock();
            if state.permission == Permission::Denied {
                return Err(RecorderError::PermissionDenied);
            }
            if !state.available {
                return Err(RecorderError::DeviceUnavailable(
                    "simulated input is unavailable".to_string(),
                ));
            }
            if !state.capabilities.supports(request.sample_rate, request.channels) {
                return Err(RecorderError::DeviceUnavailable(format!(
                    "{}Hz x {} channels not supported",
                    request.sample_rate, request.channels
                )));
            }

            let (tx, rx) = mpsc::channel(FRAME_QUEUE);
            state.frame_tx = Some(tx);
            state.request = Some(request);
            state.frames_captured = 0;
            state.generation += 1;
            state.open_count += 1;
            (rx, state.tone_hz.map(|hz| (hz, state.generation)))
        };

        if let Some((hz, generation)) = tone {
            self.spawn_tone(hz, generation);
        }

        info!(
            "Simulated input opened ({}Hz, {} channels)",
            request.sample_rate, request.channels
        );
        Ok(rx)
    }

    fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.frame_tx.take().is_some() {
            state.request = None;
            state.close_count += 1;
            info!("Simulated input closed");
        }
    }

    fn is_capturing(&self) -> bool {
        self.inner.state.lock().frame_tx.is_some()
    }

    fn permission(&self) -> Permission {
        self.inner.state.lock().permission
    }

    fn capabilities(&self) -> Result<InputCapabilities, RecorderError> {
        Ok(self.inner.state.lock().capabilities.clone())
    }

    fn read_levels(&self) -> Result<InputLevels, RecorderError> {
        let mut state = self.inner.state.lock();
        if state.failing_level_reads > 0 {
            state.failing_level_reads -= 1;
            return Err(RecorderError::Unknown("simulated level read failure".to_string()));
        }
        if state.frame_tx.is_none() {
            return Err(RecorderError::DeviceUnavailable("input is not open".to_string()));
        }
        Ok(state.levels)
    }

    fn subscribe_interruptions(&self) -> broadcast::Receiver<Interruption> {
        self.inner.interruptions.subscribe()
    }

    fn name(&self) -> &str {
        "simulated input"
    }
}
