//! # styletts-rs
//!
//! Style-conditioned text-to-speech with StyleTTS2, as a library and an HTTP
//! service.
//!
//! ## Features
//!
//! - **Unbounded text**: input is split into segments and stitched back with
//!   short silences
//! - **Voice cloning**: output follows the style of a reference recording
//! - **Diffusion style sampling**: seeded for reproducible output
//! - **HTTP service** (`server` feature): `POST /generate`, `GET /voices`,
//!   `GET /health`
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! styletts-rs = { version = "2026.2", default-features = false, features = ["onnx"] }
//! ```
//!
//! ```ignore
//! use std::path::PathBuf;
//! use styletts_rs::{engines::styletts2::StyleTts2Engine, SynthesisEngine};
//!
//! let mut engine = StyleTts2Engine::new();
//! engine.load_model(&PathBuf::from("models/styletts2"))?;
//!
//! let result = engine.synthesize("Hello, world!", None)?;
//! result.write_wav(&PathBuf::from("output.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engines;
#[cfg(feature = "server")]
pub mod server;

use std::io::{Cursor, Seek, Write};
use std::path::Path;

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 audio samples and the sample rate of the output audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (24000 for StyleTTS2)
    pub sample_rate: u32,
}

impl SynthesisResult {
    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    fn write_samples<W: Write + Seek>(&self, writer: W) -> Result<(), hound::Error> {
        let mut writer = hound::WavWriter::new(writer, self.wav_spec())?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_samples(file)?;
        Ok(())
    }

    /// Encode the audio as an in-memory 32-bit float WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_samples(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for text-to-speech synthesis engines.
///
/// This trait defines the standard operations that all synthesis engines must support.
/// Each engine may have different parameter types for model loading and inference configuration.
pub trait SynthesisEngine {
    /// Parameters for configuring inference behavior (voice, diffusion steps, etc.)
    type SynthesisParams;
    /// Parameters for configuring model loading (threads, etc.)
    type ModelParams: Default;

    /// Load a model from the specified path using default parameters.
    fn load_model(&mut self, model_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        self.load_model_with_params(model_path, Self::ModelParams::default())
    }

    /// Load a model from the specified path with custom parameters.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Synthesize speech from the given text.
    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>>;

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `SynthesisResult::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: Option<Self::SynthesisParams>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.synthesize(text, params)?.write_wav(wav_path)
    }
}
