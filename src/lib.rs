pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod metering;
pub mod session;

pub use audio::{
    AudioBackend, AudioFormat, AudioFrame, AudioQuality, AudioSessionArbiter, RecordedFile,
    SimulatedBackend,
};
pub use config::Config;
pub use error::{ErrorKind, RecorderError};
pub use events::{ChannelDelegate, EventEmitter, RecorderDelegate, RecorderEvent};
pub use metering::MeteringSample;
pub use session::{Recorder, RecordingConfig, RecordingControl, RecordingResult, SessionState};
