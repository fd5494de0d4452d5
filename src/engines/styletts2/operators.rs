//! Tensor contracts of the pre-trained StyleTTS2 sub-networks.
//!
//! The pipeline treats every network as a black box behind one of these
//! traits. Shapes omit the batch dimension (always 1). Feature matrices are
//! channels-first (`[channels, tokens]` or `[channels, frames]`) unless noted.

use ndarray::{Array2, ArrayView2};

use super::model::StyleTtsError;

/// Acoustic text encoder.
pub trait TextEncoder: Send + Sync {
    /// `tokens[T]` to acoustic text features `[channels, T]`.
    fn encode(&self, tokens: &[i64]) -> Result<Array2<f32>, StyleTtsError>;
}

/// BERT-style phoneme embedder and its projection into the prosody predictor.
pub trait TextEmbedder: Send + Sync {
    /// `tokens[T]` to contextual embeddings `[T, embed_dim]`.
    fn embed(&self, tokens: &[i64]) -> Result<Array2<f32>, StyleTtsError>;

    /// Embeddings `[T, embed_dim]` to duration-encoder input `[hidden, T]`.
    fn project(&self, embedding: ArrayView2<f32>) -> Result<Array2<f32>, StyleTtsError>;
}

/// Reference encoders applied to a normalised log-mel `[n_mels, frames]`.
pub trait StyleEncoder: Send + Sync {
    /// Acoustic (timbre) half, `[style_dim]`.
    fn encode_acoustic(&self, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError>;

    /// Prosodic half, `[style_dim]`.
    fn encode_prosodic(&self, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError>;
}

/// Whether the denoiser sees the text embedding or its learned null embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditioning {
    Text,
    Unconditional,
}

/// Style diffusion network.
pub trait StyleDenoiser: Send + Sync {
    /// Predict from the preconditioned latent `x[2 * style_dim]` at noise
    /// level `c_noise`, given the text embedding `[T, embed_dim]` and the
    /// reference style `features[2 * style_dim]`.
    fn denoise(
        &self,
        x: &[f32],
        c_noise: f32,
        embedding: ArrayView2<f32>,
        features: &[f32],
        conditioning: Conditioning,
    ) -> Result<Vec<f32>, StyleTtsError>;
}

/// Style-conditioned duration predictor.
pub trait DurationPredictor: Send + Sync {
    /// From projected embeddings `[hidden, T]` and the prosodic style half,
    /// return the prosody features `[T, channels]` and raw duration logits
    /// `[T, bins]`.
    fn predict(
        &self,
        encoded: ArrayView2<f32>,
        prosodic_style: &[f32],
    ) -> Result<(Array2<f32>, Array2<f32>), StyleTtsError>;
}

/// Pitch (F0) and energy predictor.
pub trait PitchEnergyPredictor: Send + Sync {
    /// Frame-level prosody features `[channels, frames]` to F0 and energy
    /// curves of `2 * frames` values each.
    fn predict(
        &self,
        prosody_frames: ArrayView2<f32>,
        prosodic_style: &[f32],
    ) -> Result<(Vec<f32>, Vec<f32>), StyleTtsError>;
}

/// HiFi-GAN decoder.
pub trait Vocoder: Send + Sync {
    /// Frame-level text features `[channels, frames]`, F0, energy and the
    /// acoustic style half to raw samples.
    fn decode(
        &self,
        text_frames: ArrayView2<f32>,
        f0: &[f32],
        energy: &[f32],
        acoustic_style: &[f32],
    ) -> Result<Vec<f32>, StyleTtsError>;
}

/// The full operator set of a loaded model.
pub struct Operators {
    pub text_encoder: Box<dyn TextEncoder>,
    pub text_embedder: Box<dyn TextEmbedder>,
    pub style_encoder: Box<dyn StyleEncoder>,
    pub denoiser: Box<dyn StyleDenoiser>,
    pub duration_predictor: Box<dyn DurationPredictor>,
    pub pitch_energy: Box<dyn PitchEnergyPredictor>,
    pub vocoder: Box<dyn Vocoder>,
}
