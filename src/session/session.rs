use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::config::RecordingConfig;
use super::result::RecordingResult;
use super::state::SessionState;
use crate::audio::{
    AudioBackend, AudioFrame, AudioSessionArbiter, AudioSessionGuard, CodecProvider, Interruption,
    InterruptionReason, Permission, RecordingFileSink, SessionClaim, SinkOptions, WriteStatus,
};
use crate::error::RecorderError;
use crate::events::EventEmitter;
use crate::metering::{LatestSample, MeteringSampler};

pub(crate) type Reply = oneshot::Sender<Result<(), RecorderError>>;

/// Host command, serialized into the session's queue
pub(crate) enum Command {
    Start { config: RecordingConfig, reply: Reply },
    Pause { reply: Reply },
    Resume { reply: Reply },
    Stop { reply: Reply },
    Reset { reply: Reply },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Collaborators the session drives
pub(crate) struct SessionContext {
    pub backend: Arc<dyn AudioBackend>,
    pub arbiter: Arc<AudioSessionArbiter>,
    pub codecs: Arc<dyn CodecProvider>,
    pub sink_options: SinkOptions,
    pub emitter: EventEmitter,
    pub state_tx: watch::Sender<SessionState>,
    pub latest: LatestSample,
}

struct PreparedRecording {
    guard: AudioSessionGuard,
    frames: mpsc::Receiver<AudioFrame>,
    sink: RecordingFileSink,
}

struct Prepared {
    id: u64,
    outcome: Result<PreparedRecording, RecorderError>,
}

struct Reopened {
    id: u64,
    outcome: Result<mpsc::Receiver<AudioFrame>, RecorderError>,
}

/// Resume accepted, hardware still being re-opened
struct Reacquisition {
    id: u64,
    task: JoinHandle<()>,
}

/// Start accepted, hardware and file not ready yet
struct Preparation {
    id: u64,
    session_id: Uuid,
    config: RecordingConfig,
    started_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// Resources owned while Recording or Paused
struct ActiveRecording {
    session_id: Uuid,
    config: RecordingConfig,
    started_at: DateTime<Utc>,
    guard: AudioSessionGuard,
    sink: RecordingFileSink,
    sampler: Option<MeteringSampler>,
    /// Time spent in closed Recording intervals
    elapsed: Duration,
    /// Start of the current Recording interval
    resumed_at: Option<Instant>,
    backpressured: bool,
    /// Sample frames delivered in a format other than the negotiated one
    rejected_frames: u64,
}

impl ActiveRecording {
    fn elapsed(&self) -> Duration {
        self.elapsed + self.resumed_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn write(&mut self, frame: AudioFrame, emitter: &EventEmitter) {
        if frame.sample_rate != self.config.sample_rate || frame.channels != self.config.channels {
            if self.rejected_frames == 0 {
                warn!(
                    session_id = %self.session_id,
                    "Dropping frames in unexpected format ({}Hz, {} channels)",
                    frame.sample_rate, frame.channels
                );
            }
            self.rejected_frames += frame.frame_count();
            return;
        }

        match self.sink.write(frame) {
            WriteStatus::Accepted => {
                if self.backpressured {
                    info!("Recording storage caught up");
                    self.backpressured = false;
                }
            }
            WriteStatus::Backpressure { dropped_frames } => {
                // One warning per backpressure episode
                if !self.backpressured {
                    self.backpressured = true;
                    let warning = RecorderError::WriteBackpressure { dropped_frames };
                    warn!(session_id = %self.session_id, "{}", warning);
                    emitter.warning(warning.kind(), warning.to_string());
                }
            }
        }
    }
}

/// The recording state machine
///
/// Runs as a single task that owns every piece of mutable recording state.
/// Host commands, capture buffers, interruptions and timer ticks are all
/// handled here one at a time, in arrival order.
pub(crate) struct RecordingSession {
    ctx: SessionContext,
    state: SessionState,
    preparing: Option<Preparation>,
    reacquiring: Option<Reacquisition>,
    active: Option<ActiveRecording>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    interruptions: Option<broadcast::Receiver<Interruption>>,
    progress: Option<Interval>,
    prepared_tx: mpsc::UnboundedSender<Prepared>,
    prepared_rx: mpsc::UnboundedReceiver<Prepared>,
    reopened_tx: mpsc::UnboundedSender<Reopened>,
    reopened_rx: mpsc::UnboundedReceiver<Reopened>,
    next_task_id: u64,
}

impl RecordingSession {
    pub(crate) fn new(ctx: SessionContext) -> Self {
        let (prepared_tx, prepared_rx) = mpsc::unbounded_channel();
        let (reopened_tx, reopened_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            state: SessionState::Idle,
            preparing: None,
            reacquiring: None,
            active: None,
            frames: None,
            interruptions: None,
            progress: None,
            prepared_tx,
            prepared_rx,
            reopened_tx,
            reopened_rx,
            next_task_id: 0,
        }
    }

    /// Process events until shutdown or until every command sender is gone
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Recording session task started ({})", self.ctx.backend.name());

        loop {
            tokio::select! {
                biased;

                frame = recv_frame(&mut self.frames) => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => self.on_stream_ended().await,
                },

                interruption = recv_interruption(&mut self.interruptions) => match interruption {
                    Some(interruption) => self.on_interruption(interruption).await,
                    None => self.interruptions = None,
                },

                Some(prepared) = self.prepared_rx.recv() => self.on_prepared(prepared).await,

                Some(reopened) = self.reopened_rx.recv() => self.on_reopened(reopened).await,

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },

                _ = tick(&mut self.progress) => self.on_progress_tick(),
            }
        }

        info!("Recording session task stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { config, reply } => {
                let result = self.start(config);
                if let Err(e) = &result {
                    warn!("Start rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::Pause { reply } => self.pause(reply).await,
            Command::Resume { reply } => self.resume(reply),
            Command::Stop { reply } => self.stop(reply).await,
            Command::Reset { reply } => self.reset(reply),
            Command::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    fn next_task_id(&mut self) -> u64 {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    fn transition(&mut self, next: SessionState) {
        let old = self.state;
        if old == next {
            return;
        }
        if !old.can_transition_to(next) {
            warn!("Unexpected state transition {:?} -> {:?}", old, next);
        }

        self.state = next;
        self.ctx.state_tx.send_replace(next);
        info!("Recording state: {:?} -> {:?}", old, next);
        self.ctx.emitter.state_changed(old, next);
    }

    fn start(&mut self, config: RecordingConfig) -> Result<(), RecorderError> {
        if self.state != SessionState::Idle {
            return Err(RecorderError::AlreadyActive);
        }

        let capabilities = match self.ctx.backend.capabilities() {
            Ok(capabilities) => Some(capabilities),
            Err(e) => {
                warn!("Could not query input capabilities: {}", e);
                None
            }
        };
        config.validate(capabilities.as_ref())?;

        if self.ctx.backend.permission() == Permission::Denied {
            return Err(RecorderError::PermissionDenied);
        }

        let claim = self
            .ctx
            .arbiter
            .try_claim()
            .ok_or(RecorderError::AlreadyActive)?;

        let id = self.next_task_id();
        let session_id = Uuid::new_v4();

        info!(
            %session_id,
            "Starting recording: {} ({}, {}Hz, {} channels)",
            config.path.display(),
            config.format,
            config.sample_rate,
            config.channels
        );

        let backend = Arc::clone(&self.ctx.backend);
        let codecs = Arc::clone(&self.ctx.codecs);
        let options = self.ctx.sink_options.clone();
        let prepared_tx = self.prepared_tx.clone();
        let task_config = config.clone();

        let task = tokio::spawn(async move {
            let outcome = prepare(backend, claim, &task_config, codecs.as_ref(), &options).await;
            let _ = prepared_tx.send(Prepared { id, outcome });
        });

        self.preparing = Some(Preparation {
            id,
            session_id,
            config,
            started_at: Utc::now(),
            task,
        });
        self.transition(SessionState::Preparing);

        Ok(())
    }

    async fn on_prepared(&mut self, prepared: Prepared) {
        let current = self.preparing.as_ref().map(|p| p.id) == Some(prepared.id);
        if !current {
            discard_prepared(prepared).await;
            return;
        }
        let Some(preparation) = self.preparing.take() else {
            return;
        };

        match prepared.outcome {
            Ok(ready) => {
                self.interruptions = Some(ready.guard.subscribe_interruptions());
                self.frames = Some(ready.frames);
                self.active = Some(ActiveRecording {
                    session_id: preparation.session_id,
                    config: preparation.config,
                    started_at: preparation.started_at,
                    guard: ready.guard,
                    sink: ready.sink,
                    sampler: None,
                    elapsed: Duration::ZERO,
                    resumed_at: None,
                    backpressured: false,
                    rejected_frames: 0,
                });
                self.enter_recording();
            }
            Err(e) => {
                error!(session_id = %preparation.session_id, "Recording failed to start: {}", e);
                self.transition(SessionState::Failed);
                self.ctx.emitter.error(e.kind(), e.to_string());
            }
        }
    }

    fn enter_recording(&mut self) {
        self.transition(SessionState::Recording);

        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.resumed_at = Some(Instant::now());

        if active.config.metering_enabled {
            active.sampler = Some(MeteringSampler::start(
                Arc::clone(&self.ctx.backend),
                active.config.metering_interval(),
                self.ctx.emitter.clone(),
                Arc::clone(&self.ctx.latest),
            ));
        }

        let period = active.config.progress_interval();
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.progress = Some(timer);
    }

    /// Stop metering and progress and close the current Recording interval
    fn suspend_capture(&mut self) {
        self.progress = None;
        if let Some(active) = self.active.as_mut() {
            if let Some(since) = active.resumed_at.take() {
                active.elapsed += since.elapsed();
            }
            active.sampler = None;
        }
    }

    async fn pause(&mut self, reply: Reply) {
        match self.state {
            SessionState::Paused => {
                if self.reacquiring.is_some() {
                    self.cancel_reacquire().await;
                } else {
                    debug!("Pause ignored, already paused");
                }
                let _ = reply.send(Ok(()));
            }
            SessionState::Recording => {
                self.suspend_capture();
                self.transition(SessionState::Paused);
                let _ = reply.send(Ok(()));
            }
            state => {
                let _ = reply.send(Err(RecorderError::InvalidState {
                    command: "pause",
                    state,
                }));
            }
        }
    }

    fn resume(&mut self, reply: Reply) {
        match self.state {
            SessionState::Paused => {}
            SessionState::Recording => {
                debug!("Resume ignored, already recording");
                let _ = reply.send(Ok(()));
                return;
            }
            state => {
                let _ = reply.send(Err(RecorderError::InvalidState {
                    command: "resume",
                    state,
                }));
                return;
            }
        }

        if self.reacquiring.is_some() {
            debug!("Resume already waiting for audio input");
            let _ = reply.send(Ok(()));
            return;
        }

        let id = self.next_task_id();
        let Some(active) = self.active.as_mut() else {
            let _ = reply.send(Ok(()));
            return;
        };

        if !active.guard.is_released() {
            self.resume_capture();
            let _ = reply.send(Ok(()));
            return;
        }

        // Recording resumes once the hardware is back; failures arrive as events
        let reopen = match active.guard.reacquire() {
            Ok(reopen) => reopen,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let reopened_tx = self.reopened_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = reopen.await;
            let _ = reopened_tx.send(Reopened { id, outcome });
        });
        self.reacquiring = Some(Reacquisition { id, task });
        let _ = reply.send(Ok(()));
    }

    fn resume_capture(&mut self) {
        if self.interruptions.is_none() {
            self.interruptions = self
                .active
                .as_ref()
                .map(|a| a.guard.subscribe_interruptions());
        }
        self.enter_recording();
    }

    async fn on_reopened(&mut self, reopened: Reopened) {
        let current = self.reacquiring.as_ref().map(|r| r.id) == Some(reopened.id);
        if !current {
            debug!("Discarding a stale audio input re-acquisition");
            return;
        }
        self.reacquiring = None;

        match reopened.outcome {
            Ok(frames) => {
                self.frames = Some(frames);
                self.resume_capture();
            }
            Err(e) => {
                if let Some(active) = self.active.as_mut() {
                    error!(session_id = %active.session_id, "Failed to re-acquire audio input: {}", e);
                    active.guard.release();
                }
                self.fail_active(e).await;
            }
        }
    }

    /// Abandon a pending resume and leave the hardware released
    async fn cancel_reacquire(&mut self) {
        let Some(reacquisition) = self.reacquiring.take() else {
            return;
        };

        reacquisition.task.abort();
        let _ = reacquisition.task.await;
        while self.reopened_rx.try_recv().is_ok() {}

        if let Some(active) = self.active.as_mut() {
            active.guard.release();
        }
        debug!("Pending resume cancelled");
    }

    async fn stop(&mut self, reply: Reply) {
        match self.state {
            SessionState::Preparing => {
                let _ = reply.send(Ok(()));
                self.cancel_preparation().await;
            }
            SessionState::Recording | SessionState::Paused => {
                let _ = reply.send(Ok(()));
                self.finish().await;
            }
            state => {
                let _ = reply.send(Err(RecorderError::InvalidState {
                    command: "stop",
                    state,
                }));
            }
        }
    }

    fn reset(&mut self, reply: Reply) {
        match self.state {
            SessionState::Failed => {
                self.transition(SessionState::Idle);
                let _ = reply.send(Ok(()));
            }
            SessionState::Idle => {
                let _ = reply.send(Ok(()));
            }
            state => {
                let _ = reply.send(Err(RecorderError::InvalidState {
                    command: "reset",
                    state,
                }));
            }
        }
    }

    /// Abort an in-flight start and release whatever it acquired
    async fn cancel_preparation(&mut self) {
        let Some(preparation) = self.preparing.take() else {
            return;
        };

        preparation.task.abort();
        // Wait for the aborted task so its claim is back before we report Idle
        let _ = preparation.task.await;
        while let Ok(stale) = self.prepared_rx.try_recv() {
            discard_prepared(stale).await;
        }

        info!(session_id = %preparation.session_id, "Recording cancelled while preparing");

        self.transition(SessionState::Stopping);
        self.ctx.emitter.result(RecordingResult::cancelled(
            preparation.session_id,
            &preparation.config,
            preparation.started_at,
        ));
        self.transition(SessionState::Idle);
    }

    /// Stop path: finalize the file, release the hardware, report the result
    async fn finish(&mut self) {
        let was_recording = self.state == SessionState::Recording;
        self.cancel_reacquire().await;
        self.suspend_capture();
        self.transition(SessionState::Stopping);

        let Some(mut active) = self.active.take() else {
            self.transition(SessionState::Idle);
            return;
        };

        // Buffers the hardware already delivered belong to the recording
        if let Some(mut frames) = self.frames.take() {
            if was_recording {
                while let Ok(frame) = frames.try_recv() {
                    active.write(frame, &self.ctx.emitter);
                }
            }
        }
        self.interruptions = None;
        *self.ctx.latest.lock() = None;

        let elapsed = active.elapsed();
        let ActiveRecording {
            session_id,
            started_at,
            mut guard,
            sink,
            rejected_frames,
            ..
        } = active;
        guard.release();
        drop(guard);

        match sink.finalize().await {
            Ok(mut summary) => {
                summary.frames_dropped += rejected_frames;
                info!(
                    %session_id,
                    "Recording finished: {:.2}s of audio over {:.2}s recording",
                    summary.duration.as_secs_f64(),
                    elapsed.as_secs_f64()
                );
                self.ctx
                    .emitter
                    .result(RecordingResult::finished(session_id, started_at, &summary));
                self.transition(SessionState::Idle);
            }
            Err(e) => {
                error!(%session_id, "Recording could not be finalized: {}", e);
                self.transition(SessionState::Failed);
                self.ctx.emitter.error(e.kind(), e.to_string());
            }
        }
    }

    /// Unrecoverable error while Recording or Paused
    async fn fail_active(&mut self, error: RecorderError) {
        self.cancel_reacquire().await;
        self.suspend_capture();
        self.frames = None;
        self.interruptions = None;
        *self.ctx.latest.lock() = None;

        if let Some(active) = self.active.take() {
            let ActiveRecording { guard, sink, .. } = active;
            drop(guard);
            // Keep what was captured so far
            if let Err(e) = sink.finalize().await {
                warn!("Partial recording could not be finalized: {}", e);
            }
        }

        self.transition(SessionState::Failed);
        self.ctx.emitter.error(error.kind(), error.to_string());
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if self.state != SessionState::Recording {
            trace!("Dropping capture buffer while {:?}", self.state);
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.write(frame, &self.ctx.emitter);
        }
    }

    async fn on_stream_ended(&mut self) {
        self.frames = None;
        if self.state == SessionState::Recording {
            warn!("Capture stream ended unexpectedly");
            self.on_interruption(Interruption::Began {
                reason: InterruptionReason::StreamEnded,
                exclusive: true,
            })
            .await;
        } else if let Some(active) = self.active.as_mut() {
            // Resume has to open a new stream
            debug!("Capture stream ended while {:?}", self.state);
            active.guard.release();
        }
    }

    async fn on_interruption(&mut self, interruption: Interruption) {
        if self.active.is_none() {
            debug!("Ignoring {:?} with no active recording", interruption);
            return;
        }

        match interruption {
            Interruption::Began { reason, exclusive } => {
                warn!("Audio input interrupted: {:?} (exclusive={})", reason, exclusive);

                // Forced pause; the host decides whether to resume or stop
                if self.state == SessionState::Recording {
                    self.suspend_capture();
                    self.transition(SessionState::Paused);
                }

                if exclusive {
                    self.cancel_reacquire().await;
                    if let Some(active) = self.active.as_mut() {
                        active.guard.release();
                    }
                    self.frames = None;
                }

                self.ctx.emitter.interruption(true, Some(reason), exclusive);
            }
            Interruption::Ended => {
                info!("Audio input interruption ended");
                self.ctx.emitter.interruption(false, None, false);
            }
        }
    }

    fn on_progress_tick(&mut self) {
        if self.state != SessionState::Recording {
            return;
        }
        if let Some(active) = &self.active {
            self.ctx.emitter.progress(active.elapsed());
        }
    }

    /// Process teardown: nothing may outlive the session task
    async fn teardown(&mut self) {
        info!("Recording session shutting down ({:?})", self.state);
        if self.preparing.is_some() {
            self.cancel_preparation().await;
        }
        if matches!(self.state, SessionState::Recording | SessionState::Paused) {
            self.finish().await;
        }
    }
}

/// Acquire the hardware, then open the file; roll back the first if the second fails
async fn prepare(
    backend: Arc<dyn AudioBackend>,
    claim: SessionClaim,
    config: &RecordingConfig,
    codecs: &dyn CodecProvider,
    options: &SinkOptions,
) -> Result<PreparedRecording, RecorderError> {
    let (mut guard, frames) =
        AudioSessionGuard::acquire(backend, claim, config.stream_request()).await?;

    match RecordingFileSink::open(&config.path, config.encoder_spec(), codecs, options) {
        Ok(sink) => Ok(PreparedRecording {
            guard,
            frames,
            sink,
        }),
        Err(e) => {
            guard.release();
            Err(e)
        }
    }
}

async fn discard_prepared(prepared: Prepared) {
    if let Ok(ready) = prepared.outcome {
        debug!("Discarding resources of a cancelled start");
        drop(ready.guard);
        ready.sink.discard().await;
    }
}

async fn recv_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_interruption(
    interruptions: &mut Option<broadcast::Receiver<Interruption>>,
) -> Option<Interruption> {
    let Some(rx) = interruptions else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(interruption) => return Some(interruption),
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} interruption notifications", missed);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
