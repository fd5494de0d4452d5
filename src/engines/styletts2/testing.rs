//! Deterministic stand-ins for the neural operators and the espeak backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::{Array2, ArrayView2};

use super::config::ModelConfig;
use super::model::{StyleTtsError, StyleTts2Model};
use super::operators::{
    Conditioning, DurationPredictor, Operators, PitchEnergyPredictor, StyleDenoiser,
    StyleEncoder, TextEmbedder, TextEncoder, Vocoder,
};
use super::phonemizer::GraphemeToPhoneme;
use super::vocab::Vocab;

/// Style half length used by the fakes.
pub const FAKE_STYLE_DIM: usize = 16;
/// Samples the fake vocoder emits per frame.
pub const FAKE_HOP: usize = 10;
/// Frames the fake duration predictor assigns to every token.
pub const FAKE_FRAMES_PER_TOKEN: usize = 5;

const TEXT_CHANNELS: usize = 4;
const EMBED_DIM: usize = 6;
const DURATION_BINS: usize = FAKE_FRAMES_PER_TOKEN;

/// Callback fired by the fake vocoder on every decode.
pub type DecodeHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Knobs for [`fake_model_with`].
#[derive(Clone, Default)]
pub struct FakeOptions {
    /// Vocoder emits NaN samples.
    pub poison_vocoder: bool,
    /// Vocoder sleeps this long before returning.
    pub vocoder_delay: Option<Duration>,
    /// Backend sleeps this long per batch.
    pub g2p_delay: Option<Duration>,
    /// Called with the 1-based decode count after each vocoder call.
    pub on_decode: Option<DecodeHook>,
}

/// Lowercasing passthrough backend; keeps any symbol it is given.
#[derive(Default)]
pub struct FakeG2p {
    pub delay: Option<Duration>,
}

impl GraphemeToPhoneme for FakeG2p {
    fn phonemize_batch(&self, segments: &[&str]) -> Result<Vec<String>, StyleTtsError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(segments.iter().map(|s| s.to_lowercase()).collect())
    }
}

struct FakeTextEncoder;

impl TextEncoder for FakeTextEncoder {
    fn encode(&self, tokens: &[i64]) -> Result<Array2<f32>, StyleTtsError> {
        Ok(Array2::from_shape_fn((TEXT_CHANNELS, tokens.len()), |(c, t)| {
            tokens[t] as f32 * 0.01 + c as f32 * 0.1
        }))
    }
}

struct FakeTextEmbedder;

impl TextEmbedder for FakeTextEmbedder {
    fn embed(&self, tokens: &[i64]) -> Result<Array2<f32>, StyleTtsError> {
        Ok(Array2::from_shape_fn((tokens.len(), EMBED_DIM), |(t, e)| {
            ((tokens[t] + e as i64) as f32 * 0.1).sin()
        }))
    }

    fn project(&self, embedding: ArrayView2<f32>) -> Result<Array2<f32>, StyleTtsError> {
        Ok(embedding.t().to_owned())
    }
}

struct FakeStyleEncoder {
    dim: usize,
}

impl FakeStyleEncoder {
    fn summarize(&self, mel: ArrayView2<f32>, offset: f32) -> Vec<f32> {
        let rows = mel.nrows().max(1);
        (0..self.dim)
            .map(|i| {
                let row = mel.row(i % rows);
                let mean = row.mean().unwrap_or(0.0);
                (mean * 0.1 + offset + i as f32 * 0.001).tanh()
            })
            .collect()
    }
}

impl StyleEncoder for FakeStyleEncoder {
    fn encode_acoustic(&self, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError> {
        Ok(self.summarize(mel, 0.0))
    }

    fn encode_prosodic(&self, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError> {
        Ok(self.summarize(mel, 0.5))
    }
}

struct FakeDenoiser;

impl StyleDenoiser for FakeDenoiser {
    fn denoise(
        &self,
        x: &[f32],
        c_noise: f32,
        embedding: ArrayView2<f32>,
        features: &[f32],
        conditioning: Conditioning,
    ) -> Result<Vec<f32>, StyleTtsError> {
        let text = match conditioning {
            Conditioning::Text => embedding.mean().unwrap_or(0.0),
            Conditioning::Unconditional => 0.0,
        };
        Ok(x.iter()
            .zip(features)
            .map(|(x, f)| 0.5 * x.tanh() + 0.1 * f + 0.01 * c_noise + text)
            .collect())
    }
}

struct FakeDurationPredictor;

impl DurationPredictor for FakeDurationPredictor {
    fn predict(
        &self,
        encoded: ArrayView2<f32>,
        prosodic_style: &[f32],
    ) -> Result<(Array2<f32>, Array2<f32>), StyleTtsError> {
        let shift = prosodic_style.first().copied().unwrap_or(0.0);
        let features = encoded.t().mapv(|v| v + shift);
        // sigmoid(10) * 5 rounds to 5 frames per token
        let logits = Array2::from_elem((encoded.ncols(), DURATION_BINS), 10.0);
        Ok((features, logits))
    }
}

struct FakePitchEnergy;

impl PitchEnergyPredictor for FakePitchEnergy {
    fn predict(
        &self,
        prosody_frames: ArrayView2<f32>,
        prosodic_style: &[f32],
    ) -> Result<(Vec<f32>, Vec<f32>), StyleTtsError> {
        let n = 2 * prosody_frames.ncols();
        let base = 100.0 + prosodic_style.first().copied().unwrap_or(0.0);
        Ok((vec![base; n], vec![0.5; n]))
    }
}

struct FakeVocoder {
    options: FakeOptions,
    calls: AtomicUsize,
}

impl Vocoder for FakeVocoder {
    fn decode(
        &self,
        text_frames: ArrayView2<f32>,
        f0: &[f32],
        energy: &[f32],
        acoustic_style: &[f32],
    ) -> Result<Vec<f32>, StyleTtsError> {
        if let Some(delay) = self.options.vocoder_delay {
            std::thread::sleep(delay);
        }
        let frames = text_frames.ncols();
        let gain = 0.1 + 0.01 * acoustic_style.first().copied().unwrap_or(0.0).abs();
        let pitch = f0.first().copied().unwrap_or(100.0);
        let level = energy.first().copied().unwrap_or(0.5);
        let mut samples: Vec<f32> = (0..frames * FAKE_HOP)
            .map(|i| {
                let frame = text_frames.column(i / FAKE_HOP).sum();
                gain * level * (i as f32 * pitch / 24000.0 + frame).sin()
            })
            .collect();
        if self.options.poison_vocoder {
            if let Some(first) = samples.first_mut() {
                *first = f32::NAN;
            }
        }

        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.options.on_decode {
            hook(count);
        }
        Ok(samples)
    }
}

/// Model built from the fakes with default options.
pub fn fake_model() -> StyleTts2Model {
    fake_model_with(FakeOptions::default())
}

pub fn fake_model_with(options: FakeOptions) -> StyleTts2Model {
    let mut config = ModelConfig::new(
        PathBuf::from("asr.pth"),
        PathBuf::from("f0.t7"),
        PathBuf::from("plbert"),
    );
    config.style_dim = FAKE_STYLE_DIM;

    let g2p = FakeG2p {
        delay: options.g2p_delay,
    };
    let operators = Operators {
        text_encoder: Box::new(FakeTextEncoder),
        text_embedder: Box::new(FakeTextEmbedder),
        style_encoder: Box::new(FakeStyleEncoder {
            dim: FAKE_STYLE_DIM,
        }),
        denoiser: Box::new(FakeDenoiser),
        duration_predictor: Box::new(FakeDurationPredictor),
        pitch_energy: Box::new(FakePitchEnergy),
        vocoder: Box::new(FakeVocoder {
            options,
            calls: AtomicUsize::new(0),
        }),
    };

    StyleTts2Model::from_parts(config, Vocab::styletts2(), operators, Box::new(g2p))
        .expect("fake model parts are valid")
}

/// Samples of a segment whose phoneme string has `phoneme_chars` symbols.
pub fn fake_segment_samples(phoneme_chars: usize) -> usize {
    (phoneme_chars + 1) * FAKE_FRAMES_PER_TOKEN * FAKE_HOP
}

/// Write a mono 16-bit 440 Hz tone.
pub fn write_tone_wav(dir: &Path, name: &str, sample_rate: u32, secs: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
    let total = (sample_rate as f32 * secs) as usize;
    for i in 0..total {
        let t = i as f32 / sample_rate as f32;
        let value = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
        writer
            .write_sample((value * i16::MAX as f32) as i16)
            .expect("write sample");
    }
    writer.finalize().expect("finalize wav");
    path
}
