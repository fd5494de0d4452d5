//! Speech synthesis engines.
//!
//! # Available Engines
//!
//! - `styletts2` - StyleTTS2 style-conditioned TTS. The pipeline is always
//!   built; the ONNX Runtime operators and [`styletts2::StyleTts2Engine`]
//!   need the `onnx` feature (espeak-ng required at runtime).

pub mod styletts2;
