// Integration tests for the recording file sink
//
// These tests verify file creation, format selection, finalization and
// cleanup against the built-in WAV codecs.

use anyhow::Result;
use audio_recorder::audio::{
    AudioFormat, AudioFrame, Codec, Container, EncoderSpec, RecordedFile, RecordingFileSink,
    SinkOptions, WavCodecProvider, WriteStatus,
};
use audio_recorder::RecorderError;
use std::time::Duration;

fn spec(format: AudioFormat) -> EncoderSpec {
    EncoderSpec {
        sample_rate: 16_000,
        channels: 2,
        format,
    }
}

fn stereo_frame(frames: usize, value: i16) -> AudioFrame {
    AudioFrame {
        samples: vec![value; frames * 2],
        sample_rate: 16_000,
        channels: 2,
        timestamp_ms: 0,
    }
}

#[tokio::test]
async fn test_sink_writes_and_finalizes_wav() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("take.wav");

    let mut sink = RecordingFileSink::open(
        &path,
        spec(AudioFormat::WAV_PCM16),
        &WavCodecProvider,
        &SinkOptions::default(),
    )?;
    assert_eq!(sink.path(), path.as_path());

    for _ in 0..5 {
        assert_eq!(sink.write(stereo_frame(3200, 1000)), WriteStatus::Accepted);
    }

    let summary = sink.finalize().await?;
    assert_eq!(summary.frames_written, 16_000);
    assert_eq!(summary.frames_dropped, 0);
    assert_eq!(summary.duration, Duration::from_secs(1));
    assert_eq!(summary.file_size, std::fs::metadata(&path)?.len());

    let file = RecordedFile::open(&path)?;
    assert_eq!(file.frame_count, 16_000);
    assert_eq!(file.channels, 2);
    assert_eq!(file.bits_per_sample, 16);
    assert!(!file.is_float);
    assert_eq!(file.samples_read, 32_000);
    assert!(file.is_consistent());

    Ok(())
}

#[tokio::test]
async fn test_sink_writes_float_wav() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("float.wav");

    let mut sink = RecordingFileSink::open(
        &path,
        spec(AudioFormat::WAV_FLOAT32),
        &WavCodecProvider,
        &SinkOptions::default(),
    )?;
    sink.write(stereo_frame(1600, -16384));
    sink.finalize().await?;

    let file = RecordedFile::open(&path)?;
    assert!(file.is_float);
    assert_eq!(file.bits_per_sample, 32);
    assert_eq!(file.frame_count, 1600);
    assert_eq!(file.samples_read, 3200);
    assert!(file.is_consistent());

    Ok(())
}

#[tokio::test]
async fn test_open_truncates_existing_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("reused.wav");
    std::fs::write(&path, vec![0u8; 100_000])?;

    let sink = RecordingFileSink::open(
        &path,
        spec(AudioFormat::WAV_PCM16),
        &WavCodecProvider,
        &SinkOptions::default(),
    )?;
    let summary = sink.finalize().await?;

    assert!(summary.file_size < 1000);
    assert_eq!(RecordedFile::open(&path)?.frame_count, 0);

    Ok(())
}

#[test]
fn test_open_missing_parent_is_path_unwritable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("no").join("such").join("dir.wav");

    let result = RecordingFileSink::open(
        &path,
        spec(AudioFormat::WAV_PCM16),
        &WavCodecProvider,
        &SinkOptions::default(),
    );

    assert!(matches!(result, Err(RecorderError::PathUnwritable { .. })));
    assert!(!path.exists());

    Ok(())
}

#[test]
fn test_open_unavailable_format_is_format_unsupported() -> Result<()> {
    let dir = tempfile::tempdir()?;

    for format in [
        AudioFormat::new(Container::Mpeg4, Codec::Aac),
        AudioFormat::new(Container::Mpeg4, Codec::HeAac),
        AudioFormat::new(Container::Mpeg4, Codec::AacEld),
        // Not a valid container/codec pair at all
        AudioFormat::new(Container::Wav, Codec::Aac),
    ] {
        let path = dir.path().join(format!("out.{}", format.file_extension()));
        let result = RecordingFileSink::open(&path, spec(format), &WavCodecProvider, &SinkOptions::default());
        assert!(
            matches!(result, Err(RecorderError::FormatUnsupported(_))),
            "{} should be rejected",
            format
        );
        assert!(!path.exists());
    }

    Ok(())
}

#[tokio::test]
async fn test_discard_removes_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rollback.wav");

    let mut sink = RecordingFileSink::open(
        &path,
        spec(AudioFormat::WAV_PCM16),
        &WavCodecProvider,
        &SinkOptions::default(),
    )?;
    sink.write(stereo_frame(160, 1));
    assert!(path.exists());

    sink.discard().await;
    assert!(!path.exists());

    Ok(())
}

#[tokio::test]
async fn test_periodic_flush_keeps_unfinalized_file_readable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("crash.wav");
    let options = SinkOptions {
        queue_capacity: 16,
        flush_interval: Duration::from_millis(10),
    };

    let mut sink = RecordingFileSink::open(&path, spec(AudioFormat::WAV_PCM16), &WavCodecProvider, &options)?;
    assert_eq!(sink.write(stereo_frame(1600, 500)), WriteStatus::Accepted);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Header already describes everything written before the flush
    let file = RecordedFile::open(&path)?;
    assert_eq!(file.frame_count, 1600);

    sink.finalize().await?;

    Ok(())
}

#[tokio::test]
async fn test_frame_counts_use_channel_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mono.wav");
    let mono = EncoderSpec {
        sample_rate: 8000,
        channels: 1,
        format: AudioFormat::default(),
    };

    let mut sink = RecordingFileSink::open(&path, mono, &WavCodecProvider, &SinkOptions::default())?;
    sink.write(AudioFrame {
        samples: vec![0; 4000],
        sample_rate: 8000,
        channels: 1,
        timestamp_ms: 0,
    });
    let summary = sink.finalize().await?;

    assert_eq!(summary.frames_written, 4000);
    assert_eq!(summary.duration, Duration::from_millis(500));
    assert_eq!(summary.sample_rate, 8000);
    assert_eq!(summary.channels, 1);

    Ok(())
}
