use anyhow::{Context, Result};
use audio_recorder::audio::AudioBackend;
use audio_recorder::{
    ChannelDelegate, Config, RecordedFile, Recorder, RecorderEvent, RecordingControl,
    SessionState, SimulatedBackend,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audio-recorder", version, about = "Record audio input to a file")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/audio-recorder")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record until the time limit or Ctrl-C, printing events as JSON lines
    Record {
        /// Output file; relative names land in the configured output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<f64>,

        #[arg(long)]
        sample_rate: Option<u32>,

        #[arg(long)]
        channels: Option<u16>,

        /// wav, wav-float, m4a-aac, m4a-he-aac or m4a-aac-eld
        #[arg(long)]
        format: Option<String>,

        #[arg(long)]
        no_metering: bool,

        /// Frequency of the simulated input tone
        #[arg(long, default_value_t = 440.0)]
        tone: f32,

        /// Capture from the system microphone instead of the simulated input
        #[arg(long)]
        microphone: bool,
    },

    /// Print the header of a recorded file
    Inspect { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Record {
            output,
            seconds,
            sample_rate,
            channels,
            format,
            no_metering,
            tone,
            microphone,
        } => {
            let mut defaults = cfg.recording;
            if let Some(rate) = sample_rate {
                defaults.sample_rate = rate;
            }
            if let Some(channels) = channels {
                defaults.channels = channels;
            }
            if let Some(format) = format {
                defaults.format = format;
                defaults.quality = None;
            }
            if no_metering {
                defaults.metering_enabled = false;
            }

            if let Some(dir) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            } else {
                std::fs::create_dir_all(&defaults.output_dir)?;
            }

            let config = defaults.recording_config(&output)?;
            let backend = input_backend(microphone, tone)?;
            record(backend, config, cfg.sink.sink_options(), seconds).await
        }
        Command::Inspect { path } => {
            let file = RecordedFile::open(&path)?;
            info!("File: {}", path.display());
            info!("Duration: {:.2} seconds", file.duration_seconds);
            info!("Sample rate: {} Hz", file.sample_rate);
            info!("Channels: {}", file.channels);
            info!(
                "Format: {}-bit {}",
                file.bits_per_sample,
                if file.is_float { "float" } else { "PCM" }
            );
            info!("Frames: {}", file.frame_count);
            if !file.is_consistent() {
                warn!("Header length does not match the sample data");
            }
            Ok(())
        }
    }
}

#[cfg(feature = "microphone")]
fn input_backend(microphone: bool, tone: f32) -> Result<Arc<dyn AudioBackend>> {
    if microphone {
        return Ok(Arc::new(audio_recorder::audio::microphone::MicrophoneBackend::new(None)));
    }
    Ok(Arc::new(SimulatedBackend::new().with_tone(tone)))
}

#[cfg(not(feature = "microphone"))]
fn input_backend(microphone: bool, tone: f32) -> Result<Arc<dyn AudioBackend>> {
    if microphone {
        anyhow::bail!("built without microphone support; rebuild with --features microphone");
    }
    Ok(Arc::new(SimulatedBackend::new().with_tone(tone)))
}

async fn record(
    backend: Arc<dyn AudioBackend>,
    config: audio_recorder::RecordingConfig,
    sink_options: audio_recorder::audio::SinkOptions,
    seconds: Option<f64>,
) -> Result<()> {
    let deadline = time_limit(seconds)?;
    let (delegate, mut events) = ChannelDelegate::new();
    let recorder = Recorder::builder(backend, Arc::new(delegate))
        .sink_options(sink_options)
        .build();

    recorder.start(config).await?;

    let limit = async {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(limit);
    let mut stopping = false;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(());
                };
                println!("{}", serde_json::to_string(&event)?);

                match &event {
                    RecorderEvent::Result(result) => {
                        info!(
                            "Saved {} ({:.2}s, {} bytes)",
                            result.path.display(),
                            result.duration_secs,
                            result.file_size
                        );
                        break Ok(());
                    }
                    RecorderEvent::Error { message, .. }
                        if recorder.current_state() == SessionState::Failed =>
                    {
                        break Err(anyhow::anyhow!("recording failed: {}", message));
                    }
                    _ => {}
                }
            }
            _ = &mut limit, if !stopping => {
                stopping = true;
                recorder.stop().await?;
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                info!("Interrupted, stopping");
                stopping = true;
                recorder.stop().await?;
            }
        }
    };

    recorder.shutdown().await;
    outcome
}

fn time_limit(seconds: Option<f64>) -> Result<Option<Duration>> {
    seconds
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("--seconds must be a finite, non-negative number (got {})", secs))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_limit() {
        assert_eq!(time_limit(None).ok(), Some(None));
        assert_eq!(time_limit(Some(1.5)).ok(), Some(Some(Duration::from_millis(1500))));
        assert_eq!(time_limit(Some(0.0)).ok(), Some(Some(Duration::ZERO)));

        assert!(time_limit(Some(f64::INFINITY)).is_err());
        assert!(time_limit(Some(f64::NAN)).is_err());
        assert!(time_limit(Some(-1.0)).is_err());
    }
}
