use std::fs;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::backend::AudioFrame;
use super::codec::{AudioEncoder, AudioFormat, CodecProvider, EncoderSpec};
use crate::error::RecorderError;

/// Tuning for the sink's internal buffering
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Capture buffers queued for the writer thread before frames are dropped
    pub queue_capacity: usize,
    /// How often the container header is rewritten while recording
    pub flush_interval: Duration,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of a non-blocking write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Accepted,
    /// Storage is behind; the buffer was dropped. Count is cumulative.
    Backpressure { dropped_frames: u64 },
}

/// What a finalized recording file contains
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSummary {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames encoded into the file
    pub frames_written: u64,
    /// Sample frames dropped under backpressure
    pub frames_dropped: u64,
    pub duration: Duration,
    pub file_size: u64,
}

struct WriterOutcome {
    frames_written: u64,
    result: Result<(), String>,
}

/// Destination file for one recording
///
/// Writes hand buffers to a dedicated writer thread through a bounded
/// queue, so the capture path never waits on storage.
pub struct RecordingFileSink {
    path: PathBuf,
    spec: EncoderSpec,
    tx: Option<mpsc::Sender<Vec<i16>>>,
    writer: Option<JoinHandle<WriterOutcome>>,
    frames_dropped: u64,
}

impl RecordingFileSink {
    /// Create (or truncate) `path` and start the writer thread
    pub fn open(
        path: impl AsRef<Path>,
        spec: EncoderSpec,
        codecs: &dyn CodecProvider,
        options: &SinkOptions,
    ) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();

        if !spec.format.is_valid_pair() || !codecs.supports(&spec.format) {
            return Err(RecorderError::FormatUnsupported(format!(
                "{} is not available",
                spec.format
            )));
        }

        check_parent_writable(&path)?;

        let encoder = codecs
            .create(&path, &spec)
            .map_err(|e| RecorderError::PathUnwritable {
                path: path.clone(),
                reason: format!("{:#}", e),
            })?;

        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let flush_every = ((options.flush_interval.as_secs_f64() * spec.sample_rate as f64) as u64).max(1);
        let channels = spec.channels;

        let writer = std::thread::Builder::new()
            .name("recording-sink".to_string())
            .spawn(move || run_writer(encoder, rx, channels, flush_every))
            .map_err(|e| RecorderError::Unknown(format!("Failed to spawn sink writer: {}", e)))?;

        info!(
            "Recording file opened: {} ({}, {}Hz, {} channels)",
            path.display(),
            spec.format,
            spec.sample_rate,
            spec.channels
        );

        Ok(Self {
            path,
            spec,
            tx: Some(tx),
            writer: Some(writer),
            frames_dropped: 0,
        })
    }

    /// Queue a capture buffer for writing. Never blocks.
    pub fn write(&mut self, frame: AudioFrame) -> WriteStatus {
        let frames = frame.frame_count();
        let Some(tx) = &self.tx else {
            self.frames_dropped += frames;
            return WriteStatus::Backpressure {
                dropped_frames: self.frames_dropped,
            };
        };

        match tx.try_send(frame.samples) {
            Ok(()) => WriteStatus::Accepted,
            Err(TrySendError::Full(_)) => {
                self.frames_dropped += frames;
                debug!("Sink queue full, dropped {} frames", frames);
                WriteStatus::Backpressure {
                    dropped_frames: self.frames_dropped,
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.frames_dropped += frames;
                warn!("Sink writer is gone, dropped {} frames", frames);
                WriteStatus::Backpressure {
                    dropped_frames: self.frames_dropped,
                }
            }
        }
    }

    /// Flush buffered data, write container metadata and close the file
    ///
    /// On failure the file is left in its last-flushed state.
    pub async fn finalize(mut self) -> Result<SinkSummary, RecorderError> {
        let outcome = self.close_writer().await?;

        if let Err(msg) = outcome.result {
            error!("Finalizing {} failed: {}", self.path.display(), msg);
            return Err(RecorderError::FinalizeError(msg));
        }

        let file_size = tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .map_err(|e| RecorderError::FinalizeError(format!("{}: {}", self.path.display(), e)))?;

        let duration = if self.spec.sample_rate > 0 {
            Duration::from_secs_f64(outcome.frames_written as f64 / self.spec.sample_rate as f64)
        } else {
            Duration::ZERO
        };

        info!(
            "Recording file finalized: {} ({:.2}s, {} bytes, {} frames dropped)",
            self.path.display(),
            duration.as_secs_f64(),
            file_size,
            self.frames_dropped
        );

        Ok(SinkSummary {
            path: self.path.clone(),
            format: self.spec.format,
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
            frames_written: outcome.frames_written,
            frames_dropped: self.frames_dropped,
            duration,
            file_size,
        })
    }

    /// Stop writing and delete the file (rollback of a failed start)
    pub async fn discard(mut self) {
        if let Err(e) = self.close_writer().await {
            warn!("Sink writer did not shut down cleanly: {}", e);
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!("Discarded recording file {}", self.path.display()),
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn close_writer(&mut self) -> Result<WriterOutcome, RecorderError> {
        // Closing the queue lets the writer drain what is left and exit
        self.tx.take();

        let Some(writer) = self.writer.take() else {
            return Err(RecorderError::FinalizeError("sink already closed".to_string()));
        };

        tokio::task::spawn_blocking(move || writer.join())
            .await
            .map_err(|e| RecorderError::FinalizeError(format!("sink writer task failed: {}", e)))?
            .map_err(|_| RecorderError::FinalizeError("sink writer panicked".to_string()))
    }
}

fn check_parent_writable(path: &Path) -> Result<(), RecorderError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let unwritable = |reason: String| RecorderError::PathUnwritable {
        path: path.to_path_buf(),
        reason,
    };

    let meta = fs::metadata(parent)
        .map_err(|e| unwritable(format!("parent directory {}: {}", parent.display(), e)))?;

    if !meta.is_dir() {
        return Err(unwritable(format!("{} is not a directory", parent.display())));
    }
    if meta.permissions().readonly() {
        return Err(unwritable(format!("{} is read-only", parent.display())));
    }

    Ok(())
}

fn run_writer(
    mut encoder: Box<dyn AudioEncoder>,
    mut rx: mpsc::Receiver<Vec<i16>>,
    channels: u16,
    flush_every: u64,
) -> WriterOutcome {
    let channels = channels.max(1) as u64;
    let mut frames_written = 0u64;
    let mut since_flush = 0u64;
    let mut failure: Option<String> = None;

    while let Some(samples) = rx.blocking_recv() {
        // Keep draining after a failure so the capture side never sees a closed queue
        if failure.is_some() {
            continue;
        }

        if let Err(e) = encoder.write(&samples) {
            error!("Recording write failed: {:#}", e);
            failure = Some(format!("{:#}", e));
            continue;
        }

        let frames = samples.len() as u64 / channels;
        frames_written += frames;
        since_flush += frames;

        if since_flush >= flush_every {
            since_flush = 0;
            if let Err(e) = encoder.flush() {
                error!("Recording flush failed: {:#}", e);
                failure = Some(format!("{:#}", e));
            }
        }
    }

    let result = match failure {
        Some(msg) => Err(msg),
        None => encoder.finalize().map_err(|e| format!("{:#}", e)),
    };

    WriterOutcome {
        frames_written,
        result,
    }
}
