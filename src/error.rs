use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::session::SessionState;

/// Error category carried in `Error` and `Warning` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidConfig,
    AlreadyActive,
    InvalidState,
    PermissionDenied,
    DeviceUnavailable,
    PathUnwritable,
    FormatUnsupported,
    WriteBackpressure,
    FinalizeError,
    Unknown,
}

impl ErrorKind {
    /// Warnings never halt recording
    pub fn is_warning(&self) -> bool {
        matches!(self, ErrorKind::WriteBackpressure)
    }
}

/// Errors surfaced by the recorder, either returned from a command or
/// delivered through `on_error`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecorderError {
    #[error("Invalid recording configuration: {0}")]
    InvalidConfig(String),

    #[error("A recording session is already active")]
    AlreadyActive,

    #[error("Cannot {command} while {state:?}")]
    InvalidState {
        command: &'static str,
        state: SessionState,
    },

    #[error("Microphone access has not been granted")]
    PermissionDenied,

    #[error("No compatible audio input available: {0}")]
    DeviceUnavailable(String),

    #[error("Cannot write recording to {}: {reason}", path.display())]
    PathUnwritable { path: PathBuf, reason: String },

    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    #[error("Storage is falling behind, {dropped_frames} audio frames dropped")]
    WriteBackpressure { dropped_frames: u64 },

    #[error("Failed to finalize recording: {0}")]
    FinalizeError(String),

    #[error("{0}")]
    Unknown(String),
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            RecorderError::AlreadyActive => ErrorKind::AlreadyActive,
            RecorderError::InvalidState { .. } => ErrorKind::InvalidState,
            RecorderError::PermissionDenied => ErrorKind::PermissionDenied,
            RecorderError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            RecorderError::PathUnwritable { .. } => ErrorKind::PathUnwritable,
            RecorderError::FormatUnsupported(_) => ErrorKind::FormatUnsupported,
            RecorderError::WriteBackpressure { .. } => ErrorKind::WriteBackpressure,
            RecorderError::FinalizeError(_) => ErrorKind::FinalizeError,
            RecorderError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<anyhow::Error> for RecorderError {
    fn from(err: anyhow::Error) -> Self {
        RecorderError::Unknown(format!("{:#}", err))
    }
}
