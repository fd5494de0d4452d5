use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::config::ModelConfig;
use super::operators::Operators;
use super::phonemizer::GraphemeToPhoneme;
use super::vocab::Vocab;

/// Output sample rate of the StyleTTS2 decoder.
pub const SAMPLE_RATE: u32 = 24000;

/// Samples dropped from the end of every assembled waveform. The decoder
/// emits a short pulse after the last frame.
pub const TRAILING_TRIM_SAMPLES: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum StyleTtsError {
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Failed to load reference audio: {0}")]
    AudioLoad(String),
    #[error("Phoneme symbol {symbol:?} at position {position} is not in the vocabulary")]
    UnsupportedSymbol { symbol: char, position: usize },
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
    #[error("{stage} exceeded its {budget:?} budget")]
    Timeout { stage: &'static str, budget: Duration },
    #[error("Synthesis cancelled")]
    Cancelled,
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Voice '{0}' not found. Call list_voices() to see available voices.")]
    VoiceNotFound(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Failed to parse voice file: {0}")]
    VoiceParse(String),
}

/// Coarse classification of a [`StyleTtsError`], used to pick a user-facing
/// message and response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    ModelLoad,
    AudioLoad,
    UnsupportedSymbol,
    Synthesis,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    /// Errors caused by the request itself rather than the service. A
    /// `Config` error past startup can only come from request parameters.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::Config | ErrorKind::AudioLoad | ErrorKind::UnsupportedSymbol
        )
    }

    /// Errors worth retrying unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }

    /// Message safe to show to API callers.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Config => "Invalid synthesis parameters",
            ErrorKind::ModelLoad => "Model not available",
            ErrorKind::AudioLoad => "Reference audio could not be loaded",
            ErrorKind::UnsupportedSymbol => "Text contains unsupported characters",
            ErrorKind::Synthesis => "Failed to generate speech",
            ErrorKind::Timeout => "Speech generation timed out, please retry",
            ErrorKind::Cancelled => "Speech generation was cancelled",
        }
    }
}

impl StyleTtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StyleTtsError::Config(_) => ErrorKind::Config,
            StyleTtsError::ModelLoad(_) | StyleTtsError::ModelNotLoaded => ErrorKind::ModelLoad,
            StyleTtsError::AudioLoad(_) => ErrorKind::AudioLoad,
            StyleTtsError::UnsupportedSymbol { .. } => ErrorKind::UnsupportedSymbol,
            StyleTtsError::Timeout { .. } => ErrorKind::Timeout,
            StyleTtsError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Synthesis,
        }
    }

    /// Fold low-level errors into the taxonomy. Taxonomy variants pass through.
    pub(crate) fn classify(self) -> Self {
        match self.kind() {
            ErrorKind::Synthesis if !matches!(self, StyleTtsError::Synthesis(_)) => {
                StyleTtsError::Synthesis(self.to_string())
            }
            _ => self,
        }
    }
}

/// Loaded StyleTTS2 model: configuration, vocabulary, neural operators and
/// the grapheme-to-phoneme backend.
///
/// Constructed once and then only read. Share it behind an `Arc`; every
/// pipeline component borrows it. The only mutable state is the device lock
/// that keeps one inference in flight at a time.
pub struct StyleTts2Model {
    config: ModelConfig,
    vocab: Vocab,
    operators: Operators,
    g2p: Box<dyn GraphemeToPhoneme>,
    device: Mutex<()>,
}

impl StyleTts2Model {
    /// Assemble a model from already-constructed parts.
    pub fn from_parts(
        config: ModelConfig,
        vocab: Vocab,
        operators: Operators,
        g2p: Box<dyn GraphemeToPhoneme>,
    ) -> Result<Self, StyleTtsError> {
        config.validate()?;
        Ok(Self {
            config,
            vocab,
            operators,
            g2p,
            device: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn config_mut(&mut self) -> &mut ModelConfig {
        &mut self.config
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn operators(&self) -> &Operators {
        &self.operators
    }

    pub fn g2p(&self) -> &dyn GraphemeToPhoneme {
        self.g2p.as_ref()
    }

    /// Length of each style half.
    pub fn style_dim(&self) -> usize {
        self.config.style_dim
    }

    /// Wait up to `budget` for exclusive use of the compute device.
    pub(crate) fn acquire_device(
        &self,
        budget: Duration,
    ) -> Result<MutexGuard<'_, ()>, StyleTtsError> {
        self.device
            .try_lock_for(budget)
            .ok_or(StyleTtsError::Timeout {
                stage: "device acquisition",
                budget,
            })
    }
}
