// Integration tests for configuration and recording parameters
//
// These tests verify defaults, validation, format names, file loading and the
// session state table.

use anyhow::Result;
use audio_recorder::audio::{
    AudioFormat, AudioQuality, Codec, Container, InputCapabilities, SessionCategory,
};
use audio_recorder::config::Config;
use audio_recorder::session::MAX_INTERVAL_MS;
use audio_recorder::{ErrorKind, RecorderError, RecordingConfig, SessionState};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_recording_config_defaults() {
    let config = RecordingConfig::new("take.wav");

    assert_eq!(config.sample_rate, 44_100);
    assert_eq!(config.channels, 2);
    assert_eq!(config.format, AudioFormat::WAV_PCM16);
    assert_eq!(config.category, SessionCategory::Record);
    assert!(config.metering_enabled);
    assert_eq!(config.metering_interval(), Duration::from_millis(250));
    assert_eq!(config.progress_interval(), Duration::from_secs(1));
}

#[test]
fn test_recording_config_validation() {
    let caps = InputCapabilities::default();
    let valid = RecordingConfig::new("/tmp/take.wav");
    assert!(valid.validate(Some(&caps)).is_ok());
    assert!(valid.validate(None).is_ok());

    let mut config = valid.clone();
    config.path = PathBuf::new();
    assert!(matches!(config.validate(None), Err(RecorderError::InvalidConfig(_))));

    let mut config = valid.clone();
    config.channels = 0;
    assert!(matches!(config.validate(None), Err(RecorderError::InvalidConfig(_))));

    let mut config = valid.clone();
    config.metering_interval_ms = 0;
    assert!(matches!(config.validate(None), Err(RecorderError::InvalidConfig(_))));

    let mut config = valid.clone();
    config.progress_interval_ms = 0;
    assert!(matches!(config.validate(None), Err(RecorderError::InvalidConfig(_))));

    // Intervals too long to schedule are rejected up front
    let mut config = valid.clone();
    config.progress_interval_ms = u64::MAX;
    assert!(matches!(config.validate(None), Err(RecorderError::InvalidConfig(_))));

    let mut config = valid.clone();
    config.metering_interval_ms = MAX_INTERVAL_MS + 1;
    assert!(matches!(config.validate(None), Err(RecorderError::InvalidConfig(_))));

    let mut config = valid.clone();
    config.metering_interval_ms = MAX_INTERVAL_MS;
    config.progress_interval_ms = MAX_INTERVAL_MS;
    assert!(config.validate(None).is_ok());

    // Out of range for the hardware, but fine when capabilities are unknown
    let mut config = valid.clone();
    config.sample_rate = 96_000;
    assert!(matches!(config.validate(Some(&caps)), Err(RecorderError::InvalidConfig(_))));
    assert!(config.validate(None).is_ok());
}

#[test]
fn test_quality_presets_map_to_compressed_formats() {
    let config = RecordingConfig::new("memo.m4a").with_quality(AudioQuality::High);
    assert_eq!(config.format, AudioFormat::new(Container::Mpeg4, Codec::HeAac));

    assert_eq!(AudioQuality::Medium.format().codec, Codec::AacEld);
    assert_eq!(AudioQuality::Low.format().codec, Codec::Aac);
    assert_eq!(AudioQuality::Low.format().file_extension(), "m4a");
}

#[test]
fn test_format_names() -> Result<()> {
    assert_eq!("wav".parse::<AudioFormat>()?, AudioFormat::WAV_PCM16);
    assert_eq!("WAV-FLOAT".parse::<AudioFormat>()?, AudioFormat::WAV_FLOAT32);
    assert_eq!(
        "m4a-aac-eld".parse::<AudioFormat>()?,
        AudioFormat::new(Container::Mpeg4, Codec::AacEld)
    );
    assert!(matches!(
        "ogg".parse::<AudioFormat>(),
        Err(RecorderError::FormatUnsupported(_))
    ));

    assert!(AudioFormat::WAV_PCM16.is_valid_pair());
    assert!(!AudioFormat::new(Container::Wav, Codec::HeAac).is_valid_pair());
    assert!(!AudioFormat::new(Container::Mpeg4, Codec::Pcm16).is_valid_pair());

    Ok(())
}

#[test]
fn test_config_defaults_when_file_missing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = Config::load(dir.path().join("absent").to_str().unwrap_or_default())?;

    assert_eq!(cfg.recording.sample_rate, 44_100);
    assert_eq!(cfg.recording.format, "wav");
    assert!(cfg.recording.quality.is_none());
    assert_eq!(cfg.sink.queue_capacity, 64);
    assert_eq!(cfg.sink.flush_interval_ms, 1000);

    Ok(())
}

#[test]
fn test_config_loads_toml_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("audio-recorder");
    std::fs::write(
        base.with_extension("toml"),
        r#"
[recording]
output_dir = "/var/recordings"
sample_rate = 48000
channels = 1
format = "wav-float"
metering_enabled = false
category = "play-and-record"

[sink]
queue_capacity = 8
flush_interval_ms = 250
"#,
    )?;

    let cfg = Config::load(base.to_str().unwrap_or_default())?;
    assert_eq!(cfg.recording.sample_rate, 48_000);
    assert_eq!(cfg.recording.channels, 1);
    assert_eq!(cfg.recording.category, SessionCategory::PlayAndRecord);
    assert!(!cfg.recording.metering_enabled);
    // Unset keys keep their defaults
    assert_eq!(cfg.recording.metering_interval_ms, 250);

    let options = cfg.sink.sink_options();
    assert_eq!(options.queue_capacity, 8);
    assert_eq!(options.flush_interval, Duration::from_millis(250));

    let recording = cfg.recording.recording_config("take.wav")?;
    assert_eq!(recording.path, PathBuf::from("/var/recordings/take.wav"));
    assert_eq!(recording.format, AudioFormat::WAV_FLOAT32);
    assert_eq!(recording.sample_rate, 48_000);
    assert!(!recording.metering_enabled);

    // Explicit directories are kept as given
    let explicit = cfg.recording.recording_config("/tmp/elsewhere/take.wav")?;
    assert_eq!(explicit.path, PathBuf::from("/tmp/elsewhere/take.wav"));

    Ok(())
}

#[test]
fn test_quality_overrides_format_name() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("quality");
    std::fs::write(
        base.with_extension("toml"),
        "[recording]\nformat = \"wav\"\nquality = \"medium\"\n",
    )?;

    let cfg = Config::load(base.to_str().unwrap_or_default())?;
    let recording = cfg.recording.recording_config("memo.m4a")?;
    assert_eq!(recording.format, AudioQuality::Medium.format());

    Ok(())
}

#[test]
fn test_state_transition_table() {
    use SessionState::*;

    let legal = [
        (Idle, Preparing),
        (Preparing, Recording),
        (Preparing, Failed),
        (Preparing, Stopping),
        (Recording, Paused),
        (Recording, Stopping),
        (Recording, Failed),
        (Paused, Recording),
        (Paused, Stopping),
        (Paused, Failed),
        (Stopping, Idle),
        (Stopping, Failed),
        (Failed, Idle),
    ];
    let all = [Idle, Preparing, Recording, Paused, Stopping, Failed];

    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                legal.contains(&(from, to)),
                "{:?} -> {:?}",
                from,
                to
            );
        }
    }

    assert!(!Idle.is_active());
    assert!(Failed.is_active());
}

#[test]
fn test_error_kinds() {
    assert_eq!(RecorderError::AlreadyActive.kind(), ErrorKind::AlreadyActive);
    assert_eq!(
        RecorderError::WriteBackpressure { dropped_frames: 10 }.kind(),
        ErrorKind::WriteBackpressure
    );
    assert!(ErrorKind::WriteBackpressure.is_warning());
    assert!(!ErrorKind::FinalizeError.is_warning());

    let err = RecorderError::InvalidState {
        command: "pause",
        state: SessionState::Idle,
    };
    assert_eq!(err.to_string(), "Cannot pause while Idle");

    let from_anyhow: RecorderError = anyhow::anyhow!("boom").into();
    assert_eq!(from_anyhow.kind(), ErrorKind::Unknown);
}
