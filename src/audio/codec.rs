//! Container/codec selection and the encoder seam.
//!
//! Encoding itself is an external capability: the recorder only talks to
//! `CodecProvider` / `AudioEncoder`. The built-in `WavCodecProvider` covers
//! linear PCM in a WAV container through `hound`; compressed formats need a
//! host-supplied provider.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::error::RecorderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Wav,
    Mpeg4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    /// 16-bit signed integer PCM
    Pcm16,
    /// 32-bit IEEE float PCM
    Float32,
    Aac,
    HeAac,
    AacEld,
}

/// Container + codec pair named by a recording configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub container: Container,
    pub codec: Codec,
}

impl AudioFormat {
    pub const WAV_PCM16: AudioFormat = AudioFormat {
        container: Container::Wav,
        codec: Codec::Pcm16,
    };

    pub const WAV_FLOAT32: AudioFormat = AudioFormat {
        container: Container::Wav,
        codec: Codec::Float32,
    };

    pub fn new(container: Container, codec: Codec) -> Self {
        Self { container, codec }
    }

    /// Whether the codec can be carried in the container at all
    pub fn is_valid_pair(&self) -> bool {
        matches!(
            (self.container, self.codec),
            (Container::Wav, Codec::Pcm16 | Codec::Float32)
                | (Container::Mpeg4, Codec::Aac | Codec::HeAac | Codec::AacEld)
        )
    }

    pub fn file_extension(&self) -> &'static str {
        match self.container {
            Container::Wav => "wav",
            Container::Mpeg4 => "m4a",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::WAV_PCM16
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.container, self.codec) {
            (Container::Wav, Codec::Pcm16) => "wav",
            (Container::Wav, Codec::Float32) => "wav-float",
            (Container::Mpeg4, Codec::Aac) => "m4a-aac",
            (Container::Mpeg4, Codec::HeAac) => "m4a-he-aac",
            (Container::Mpeg4, Codec::AacEld) => "m4a-aac-eld",
            (container, codec) => return write!(f, "{:?}/{:?}", container, codec),
        };
        f.write_str(name)
    }
}

impl FromStr for AudioFormat {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "wav" | "wav-pcm16" => AudioFormat::WAV_PCM16,
            "wav-float" | "wav-float32" => AudioFormat::WAV_FLOAT32,
            "m4a" | "m4a-aac" => AudioFormat::new(Container::Mpeg4, Codec::Aac),
            "m4a-he-aac" => AudioFormat::new(Container::Mpeg4, Codec::HeAac),
            "m4a-aac-eld" => AudioFormat::new(Container::Mpeg4, Codec::AacEld),
            other => {
                return Err(RecorderError::FormatUnsupported(format!(
                    "unknown format name '{}'",
                    other
                )))
            }
        };
        Ok(format)
    }
}

/// Encoder quality presets offered to hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Low,
    Medium,
    High,
}

impl AudioQuality {
    pub fn format(&self) -> AudioFormat {
        let codec = match self {
            AudioQuality::High => Codec::HeAac,
            AudioQuality::Medium => Codec::AacEld,
            AudioQuality::Low => Codec::Aac,
        };
        AudioFormat::new(Container::Mpeg4, codec)
    }
}

/// PCM layout handed to an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: AudioFormat,
}

/// One open output file. Driven from the sink's writer thread.
pub trait AudioEncoder: Send {
    /// Append interleaved samples
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Make everything written so far durable, including container metadata
    fn flush(&mut self) -> Result<()>;

    /// Write final container metadata and close the file
    fn finalize(self: Box<Self>) -> Result<()>;
}

/// Factory for encoders, one per supported format
pub trait CodecProvider: Send + Sync {
    fn supports(&self, format: &AudioFormat) -> bool;

    /// Create (or truncate) `path` and return an encoder writing to it
    fn create(&self, path: &Path, spec: &EncoderSpec) -> Result<Box<dyn AudioEncoder>>;
}

/// Linear PCM in WAV through hound
#[derive(Debug, Clone, Copy, Default)]
pub struct WavCodecProvider;

impl CodecProvider for WavCodecProvider {
    fn supports(&self, format: &AudioFormat) -> bool {
        format.container == Container::Wav && matches!(format.codec, Codec::Pcm16 | Codec::Float32)
    }

    fn create(&self, path: &Path, spec: &EncoderSpec) -> Result<Box<dyn AudioEncoder>> {
        let float = spec.format.codec == Codec::Float32;
        let wav_spec = WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: if float { 32 } else { 16 },
            sample_format: if float {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        };

        let writer = WavWriter::create(path, wav_spec)
            .with_context(|| format!("Failed to create WAV file {}", path.display()))?;

        Ok(Box::new(WavEncoder { writer, float }))
    }
}

struct WavEncoder {
    writer: WavWriter<BufWriter<File>>,
    float: bool,
}

impl AudioEncoder for WavEncoder {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        for &sample in samples {
            if self.float {
                self.writer.write_sample(sample as f32 / 32768.0)?;
            } else {
                self.writer.write_sample(sample)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush WAV data")
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        self.writer.finalize().context("Failed to finalize WAV file")
    }
}
