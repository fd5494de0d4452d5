//! StyleTTS2 style-conditioned text-to-speech.
//!
//! Text of any length is split into segments, phonemized with espeak-ng and
//! synthesized segment by segment in the style of a reference recording. Per
//! segment, a style vector is sampled by diffusion conditioned on the text,
//! blended with the reference style, used to predict phoneme durations and
//! finally rendered by a HiFi-GAN decoder. Segments are joined with short
//! silences.
//!
//! # System Requirements
//!
//! **espeak-ng** must be installed on your system:
//! - **Linux**: `sudo apt-get install espeak-ng`
//! - **macOS**: `brew install espeak-ng`
//! - **Windows**: Download installer from <https://espeak-ng.org/download>
//!
//! # Model Directory Layout
//!
//! ```text
//! models/styletts2/
//! ├── config.json               # ModelConfig (paths, diffusion, blend, mel, timeouts)
//! ├── text_encoder.onnx
//! ├── bert_encoder.onnx
//! ├── style_encoder.onnx
//! ├── predictor_encoder.onnx
//! ├── diffusion.onnx
//! ├── duration_predictor.onnx
//! ├── pitch_energy.onnx
//! ├── decoder.onnx
//! ├── plbert/bert.onnx          # plbert_dir
//! └── reference_audio/          # 3.wav, amused.wav, sleepy.wav
//! ```
//!
//! # Pipeline
//!
//! | Stage | Type |
//! |---|---|
//! | Segmentation | [`segmenter::segment`] |
//! | Reference style | [`StyleExtractor`] |
//! | Phonemes and tokens | [`Phonemizer`] |
//! | Text encoding | [`TextEncoding`] |
//! | Style sampling | [`DiffusionStyleSampler`] |
//! | Durations and alignment | [`ProsodyAligner`] |
//! | Waveform | [`WaveformDecoder`] |
//! | Driver | [`SynthesisOrchestrator`] |
//!
//! # Example
//!
//! ```rust,no_run
//! use styletts_rs::engines::styletts2::{
//!     LoadOptions, StyleTts2Model, SynthesisOrchestrator, SynthesisParams,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let model = StyleTts2Model::load(Path::new("models/styletts2"), &LoadOptions::default())?;
//! let orchestrator = SynthesisOrchestrator::new(Arc::new(model));
//!
//! let result = orchestrator.synthesize(
//!     "Hello there. How are you?",
//!     Path::new("models/styletts2/reference_audio/amused.wav"),
//!     &SynthesisParams::default(),
//! )?;
//! result.write_wav(Path::new("out.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aligner;
pub mod audio;
pub mod config;
pub mod decoder;
pub mod diffusion;
#[cfg(feature = "onnx")]
pub mod engine;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod operators;
pub mod orchestrator;
pub mod params;
pub mod phonemizer;
pub mod segmenter;
pub mod style;
pub mod vocab;
pub mod voices;

#[cfg(test)]
pub(crate) mod testing;

pub use aligner::{Alignment, AlignmentMatrix, DurationPrediction, ProsodyAligner, TextEncoding};
pub use config::ModelConfig;
pub use decoder::WaveformDecoder;
pub use diffusion::DiffusionStyleSampler;
#[cfg(feature = "onnx")]
pub use engine::{StyleTts2Engine, StyleTts2InferenceParams, StyleTts2ModelParams};
pub use model::{ErrorKind, StyleTtsError, StyleTts2Model, SAMPLE_RATE};
#[cfg(feature = "onnx")]
pub use onnx::LoadOptions;
pub use orchestrator::{SynthesisOrchestrator, SynthesisState};
pub use params::{SynthesisParams, SynthesisParamsBuilder};
pub use phonemizer::{EspeakBackend, EspeakConfig, GraphemeToPhoneme, PhonemeSequence, Phonemizer};
pub use style::{StyleExtractor, StyleVector};
pub use voices::VoiceStore;
