use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::RecordingConfig;
use super::session::{Command, RecordingSession, Reply, SessionContext};
use super::state::SessionState;
use crate::audio::{
    AudioBackend, AudioSessionArbiter, CodecProvider, SinkOptions, WavCodecProvider,
};
use crate::error::RecorderError;
use crate::events::{EventEmitter, RecorderDelegate};
use crate::metering::{LatestSample, MeteringSample};

/// Host commands accepted while the session is queued for processing
const COMMAND_QUEUE: usize = 32;

/// Commands a host can issue to a recorder
///
/// Each call returns once the command has been validated and queued
/// behind any earlier one. Completion of asynchronous work (hardware
/// acquisition, file finalization) is reported through events.
#[async_trait]
pub trait RecordingControl: Send + Sync {
    async fn start(&self, config: RecordingConfig) -> Result<(), RecorderError>;

    async fn pause(&self) -> Result<(), RecorderError>;

    async fn resume(&self) -> Result<(), RecorderError>;

    async fn stop(&self) -> Result<(), RecorderError>;

    /// Leave the Failed state
    async fn reset(&self) -> Result<(), RecorderError>;

    fn current_state(&self) -> SessionState;
}

struct Inner {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    latest: LatestSample,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a recording session
///
/// Cheap to clone; every clone talks to the same session. The session task
/// ends on `shutdown` or when the last handle is dropped, finalizing any
/// recording in progress.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

pub struct RecorderBuilder {
    backend: Arc<dyn AudioBackend>,
    delegate: Arc<dyn RecorderDelegate>,
    arbiter: Option<Arc<AudioSessionArbiter>>,
    codecs: Arc<dyn CodecProvider>,
    sink_options: SinkOptions,
}

impl RecorderBuilder {
    /// Share the audio session with other recorders in the process
    pub fn arbiter(mut self, arbiter: Arc<AudioSessionArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    pub fn codecs(mut self, codecs: Arc<dyn CodecProvider>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn sink_options(mut self, options: SinkOptions) -> Self {
        self.sink_options = options;
        self
    }

    /// Spawn the session task. Must be called within a tokio runtime.
    pub fn build(self) -> Recorder {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let latest: LatestSample = Arc::new(Mutex::new(None));

        let ctx = SessionContext {
            backend: self.backend,
            arbiter: self.arbiter.unwrap_or_else(AudioSessionArbiter::new),
            codecs: self.codecs,
            sink_options: self.sink_options,
            emitter: EventEmitter::spawn(self.delegate),
            state_tx,
            latest: Arc::clone(&latest),
        };

        let task = tokio::spawn(RecordingSession::new(ctx).run(rx));

        Recorder {
            inner: Arc::new(Inner {
                commands,
                state,
                latest,
                task: Mutex::new(Some(task)),
            }),
        }
    }
}

impl Recorder {
    pub fn builder(
        backend: Arc<dyn AudioBackend>,
        delegate: Arc<dyn RecorderDelegate>,
    ) -> RecorderBuilder {
        RecorderBuilder {
            backend,
            delegate,
            arbiter: None,
            codecs: Arc::new(WavCodecProvider),
            sink_options: SinkOptions::default(),
        }
    }

    /// Recorder with its own arbiter and the built-in WAV codecs
    pub fn new(backend: Arc<dyn AudioBackend>, delegate: Arc<dyn RecorderDelegate>) -> Self {
        Self::builder(backend, delegate).build()
    }

    /// Most recent metering sample of the active recording
    pub fn current_levels(&self) -> Option<MeteringSample> {
        if !self.current_state().is_active() {
            return None;
        }
        self.inner.latest.lock().clone()
    }

    /// Finalize any recording in progress and stop the session task
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.inner.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Recording session task ended abnormally: {}", e);
            }
        }
        debug!("Recorder shut down");
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> Command,
    ) -> Result<(), RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .await
            .map_err(|_| RecorderError::Unknown("recording session has shut down".to_string()))?;
        rx.await
            .map_err(|_| RecorderError::Unknown("recording session dropped the command".to_string()))?
    }
}

#[async_trait]
impl RecordingControl for Recorder {
    async fn start(&self, config: RecordingConfig) -> Result<(), RecorderError> {
        self.request(|reply| Command::Start { config, reply }).await
    }

    async fn pause(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    async fn resume(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    async fn stop(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    async fn reset(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    fn current_state(&self) -> SessionState {
        *self.inner.state.borrow()
    }
}
