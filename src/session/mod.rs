//! Recording session management
//!
//! This module provides the recording state machine and its host handle:
//! - `RecordingConfig`: what to record and where
//! - `SessionState`: lifecycle states and the legal transitions
//! - `Recorder`: command interface backed by a single session task
//! - `RecordingResult`: the terminal outcome reported to the host

mod config;
mod recorder;
mod result;
mod session;
mod state;

pub use config::{
    RecordingConfig, DEFAULT_CHANNELS, DEFAULT_METERING_INTERVAL_MS, DEFAULT_PROGRESS_INTERVAL_MS,
    DEFAULT_SAMPLE_RATE, MAX_INTERVAL_MS,
};
pub use recorder::{Recorder, RecorderBuilder, RecordingControl};
pub use result::RecordingResult;
pub use state::SessionState;
