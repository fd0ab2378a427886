pub mod backend;
pub mod codec;
pub mod file;
pub mod guard;
pub mod simulated;
pub mod sink;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{
    AudioBackend, AudioFrame, InputCapabilities, InputLevels, Interruption, InterruptionReason,
    Permission, SessionCategory, StreamRequest,
};
pub use codec::{
    AudioEncoder, AudioFormat, AudioQuality, Codec, CodecProvider, Container, EncoderSpec,
    WavCodecProvider,
};
pub use file::RecordedFile;
pub use guard::{AudioSessionArbiter, AudioSessionGuard, SessionClaim};
pub use simulated::SimulatedBackend;
pub use sink::{RecordingFileSink, SinkOptions, SinkSummary, WriteStatus};
