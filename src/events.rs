// Recorder events for host notification
// Defines event payloads, the host delegate trait and the non-blocking emitter

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::audio::InterruptionReason;
use crate::error::ErrorKind;
use crate::metering::MeteringSample;
use crate::session::{RecordingResult, SessionState};

/// Event names as constants for consistency with the serialized `event` tag
pub mod event_names {
    pub const STATE_CHANGED: &str = "stateChanged";
    pub const RECORDING_PROGRESS: &str = "recordingProgress";
    pub const METERING: &str = "metering";
    pub const RECORDING_FINISHED: &str = "recordingFinished";
    pub const ERROR: &str = "error";
    pub const WARNING: &str = "warning";
    pub const INTERRUPTION: &str = "interruption";
}

/// Everything the recorder tells the host. Plain data, no references into
/// session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RecorderEvent {
    StateChanged {
        old: SessionState,
        new: SessionState,
    },
    #[serde(rename = "recordingProgress")]
    Progress {
        elapsed_ms: u64,
    },
    Metering(MeteringSample),
    #[serde(rename = "recordingFinished")]
    Result(RecordingResult),
    Error {
        kind: ErrorKind,
        message: String,
    },
    Warning {
        kind: ErrorKind,
        message: String,
    },
    Interruption {
        began: bool,
        reason: Option<InterruptionReason>,
        exclusive: bool,
    },
}

impl RecorderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RecorderEvent::StateChanged { .. } => event_names::STATE_CHANGED,
            RecorderEvent::Progress { .. } => event_names::RECORDING_PROGRESS,
            RecorderEvent::Metering(_) => event_names::METERING,
            RecorderEvent::Result(_) => event_names::RECORDING_FINISHED,
            RecorderEvent::Error { .. } => event_names::ERROR,
            RecorderEvent::Warning { .. } => event_names::WARNING,
            RecorderEvent::Interruption { .. } => event_names::INTERRUPTION,
        }
    }

    /// Progress and metering may be coalesced; everything else is always delivered
    fn is_lossy(&self) -> bool {
        matches!(self, RecorderEvent::Progress { .. } | RecorderEvent::Metering(_))
    }

    fn same_kind(&self, other: &RecorderEvent) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Host callback interface
///
/// All methods are called from the emitter's delivery thread, never from the
/// session. Implementations should hand work off rather than block.
pub trait RecorderDelegate: Send + Sync {
    /// Entry point for every event. The default routes to the typed hooks.
    fn on_event(&self, event: &RecorderEvent) {
        match event {
            RecorderEvent::StateChanged { old, new } => self.on_state_changed(*old, *new),
            RecorderEvent::Progress { elapsed_ms } => {
                self.on_progress(Duration::from_millis(*elapsed_ms))
            }
            RecorderEvent::Metering(sample) => self.on_metering(sample),
            RecorderEvent::Result(result) => self.on_result(result),
            RecorderEvent::Error { kind, message } => self.on_error(*kind, message),
            RecorderEvent::Warning { kind, message } => self.on_warning(*kind, message),
            RecorderEvent::Interruption {
                began,
                reason,
                exclusive,
            } => self.on_interruption(*began, *reason, *exclusive),
        }
    }

    fn on_state_changed(&self, _old: SessionState, _new: SessionState) {}

    fn on_progress(&self, _elapsed: Duration) {}

    fn on_metering(&self, _sample: &MeteringSample) {}

    fn on_result(&self, _result: &RecordingResult) {}

    fn on_error(&self, _kind: ErrorKind, _message: &str) {}

    fn on_warning(&self, _kind: ErrorKind, _message: &str) {}

    fn on_interruption(&self, _began: bool, _reason: Option<InterruptionReason>, _exclusive: bool) {}
}

/// Delegate that forwards every event into a channel
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<RecorderEvent>,
}

impl ChannelDelegate {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RecorderDelegate for ChannelDelegate {
    fn on_event(&self, event: &RecorderEvent) {
        let _ = self.tx.send(event.clone());
    }
}

struct Queue {
    events: VecDeque<RecorderEvent>,
    /// Last state announced to the host
    recording: bool,
    closed: bool,
    coalesced: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

struct EmitterHandle {
    shared: Arc<Shared>,
}

impl Drop for EmitterHandle {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.ready.notify_one();
    }
}

/// Non-blocking, ordered event delivery to a `RecorderDelegate`
///
/// Events are queued and delivered in order on a dedicated thread. While the
/// host is busy, at most one Progress and one Metering event stay pending;
/// a newer one replaces the older. Progress and Metering are only accepted
/// while the last announced state is Recording.
#[derive(Clone)]
pub struct EventEmitter {
    handle: Arc<EmitterHandle>,
}

impl EventEmitter {
    /// Start the delivery thread
    pub fn spawn(delegate: Arc<dyn RecorderDelegate>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                events: VecDeque::new(),
                recording: false,
                closed: false,
                coalesced: 0,
            }),
            ready: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name("recorder-events".to_string())
            .spawn(move || deliver_loop(worker, delegate));
        if let Err(e) = spawned {
            // Events queue up but are never delivered; the session keeps working
            warn!("Failed to spawn event delivery thread: {}", e);
        }

        Self {
            handle: Arc::new(EmitterHandle { shared }),
        }
    }

    pub fn state_changed(&self, old: SessionState, new: SessionState) {
        let shared = &self.handle.shared;
        let mut queue = shared.queue.lock();
        queue.recording = new == SessionState::Recording;
        queue.events.push_back(RecorderEvent::StateChanged { old, new });
        drop(queue);
        shared.ready.notify_one();
    }

    pub fn progress(&self, elapsed: Duration) {
        self.push(RecorderEvent::Progress {
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    pub fn metering(&self, sample: MeteringSample) {
        self.push(RecorderEvent::Metering(sample));
    }

    pub fn result(&self, result: RecordingResult) {
        self.push(RecorderEvent::Result(result));
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) {
        self.push(RecorderEvent::Error {
            kind,
            message: message.into(),
        });
    }

    pub fn warning(&self, kind: ErrorKind, message: impl Into<String>) {
        self.push(RecorderEvent::Warning {
            kind,
            message: message.into(),
        });
    }

    pub fn interruption(&self, began: bool, reason: Option<InterruptionReason>, exclusive: bool) {
        self.push(RecorderEvent::Interruption {
            began,
            reason,
            exclusive,
        });
    }

    /// Progress/Metering events replaced before the host picked them up
    pub fn coalesced_count(&self) -> u64 {
        self.handle.shared.queue.lock().coalesced
    }

    fn push(&self, event: RecorderEvent) {
        let shared = &self.handle.shared;
        let mut queue = shared.queue.lock();

        if event.is_lossy() {
            if !queue.recording {
                trace!("Suppressed {} outside Recording", event.name());
                return;
            }
            if let Some(pos) = queue.events.iter().position(|e| e.same_kind(&event)) {
                queue.events.remove(pos);
                queue.coalesced += 1;
            }
        }

        queue.events.push_back(event);
        drop(queue);
        shared.ready.notify_one();
    }
}

fn deliver_loop(shared: Arc<Shared>, delegate: Arc<dyn RecorderDelegate>) {
    loop {
        let event = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(event) = queue.events.pop_front() {
                    break Some(event);
                }
                if queue.closed {
                    break None;
                }
                shared.ready.wait(&mut queue);
            }
        };

        match event {
            Some(event) => delegate.on_event(&event),
            None => break,
        }
    }
    debug!("Event delivery stopped");
}
