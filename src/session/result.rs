use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use super::config::RecordingConfig;
use crate::audio::{AudioFormat, SinkSummary};

/// Terminal outcome of a recording session, handed to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    /// Session identifier for log correlation
    pub session_id: Uuid,

    /// Whether a complete file was produced
    pub finished: bool,

    /// Recorded file
    pub path: PathBuf,

    /// Duration of audio in the file, in seconds
    pub duration_secs: f64,

    /// Final file size in bytes
    pub file_size: u64,

    pub sample_rate: u32,

    pub channels: u16,

    pub format: AudioFormat,

    /// Sample frames written
    pub frames_written: u64,

    /// Sample frames lost to write backpressure
    pub frames_dropped: u64,

    /// When Start was accepted
    pub started_at: DateTime<Utc>,

    /// Why the session ended without a file
    pub message: Option<String>,
}

impl RecordingResult {
    pub(crate) fn finished(
        session_id: Uuid,
        started_at: DateTime<Utc>,
        summary: &SinkSummary,
    ) -> Self {
        Self {
            session_id,
            finished: true,
            path: summary.path.clone(),
            duration_secs: summary.duration.as_secs_f64(),
            file_size: summary.file_size,
            sample_rate: summary.sample_rate,
            channels: summary.channels,
            format: summary.format,
            frames_written: summary.frames_written,
            frames_dropped: summary.frames_dropped,
            started_at,
            message: None,
        }
    }

    pub(crate) fn cancelled(
        session_id: Uuid,
        config: &RecordingConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            finished: false,
            path: config.path.clone(),
            duration_secs: 0.0,
            file_size: 0,
            sample_rate: config.sample_rate,
            channels: config.channels,
            format: config.format,
            frames_written: 0,
            frames_dropped: 0,
            started_at,
            message: Some("recording stopped before capture started".to_string()),
        }
    }
}
