use ndarray::{s, Array2, ArrayView2};

use super::model::{StyleTtsError, StyleTts2Model};
use super::phonemizer::PhonemeSequence;

/// Token-level encodings of one phoneme sequence.
#[derive(Debug, Clone)]
pub struct TextEncoding {
    /// Acoustic text features, `[channels, T]`.
    pub acoustic: Array2<f32>,
    /// Contextual phoneme embedding, `[T, embed_dim]`. Conditions diffusion.
    pub embedding: Array2<f32>,
    /// Embedding projected for the duration predictor, `[hidden, T]`.
    pub duration_features: Array2<f32>,
}

impl TextEncoding {
    pub fn encode(
        model: &StyleTts2Model,
        sequence: &PhonemeSequence,
    ) -> Result<Self, StyleTtsError> {
        let tokens = &sequence.tokens;
        let t = tokens.len();
        let ops = model.operators();

        let acoustic = ops.text_encoder.encode(tokens)?;
        if acoustic.ncols() != t {
            return Err(shape_error("text encoder", t, acoustic.ncols()));
        }
        let embedding = ops.text_embedder.embed(tokens)?;
        if embedding.nrows() != t {
            return Err(shape_error("text embedder", t, embedding.nrows()));
        }
        let duration_features = ops.text_embedder.project(embedding.view())?;
        if duration_features.ncols() != t {
            return Err(shape_error("embedding projection", t, duration_features.ncols()));
        }

        Ok(Self {
            acoustic,
            embedding,
            duration_features,
        })
    }

    pub fn token_count(&self) -> usize {
        self.acoustic.ncols()
    }
}

fn shape_error(stage: &str, expected: usize, got: usize) -> StyleTtsError {
    StyleTtsError::Synthesis(format!(
        "{stage} returned {got} token positions, expected {expected}"
    ))
}

/// Whole-frame duration of every token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationPrediction(Vec<usize>);

impl DurationPrediction {
    /// Reduce `[T, bins]` logits to durations: the sigmoid of each logit is
    /// summed per token, rounded half to even and floored at one frame.
    pub fn from_logits(logits: ArrayView2<f32>) -> Result<Self, StyleTtsError> {
        let mut frames = Vec::with_capacity(logits.nrows());
        for (i, row) in logits.rows().into_iter().enumerate() {
            let total: f32 = row.iter().map(|&v| sigmoid(v)).sum();
            if !total.is_finite() {
                return Err(StyleTtsError::Synthesis(format!(
                    "duration for token {i} is not finite"
                )));
            }
            frames.push((total.round_ties_even() as usize).max(1));
        }
        Ok(Self(frames))
    }

    pub fn from_frames(frames: Vec<usize>) -> Self {
        Self(frames.into_iter().map(|f| f.max(1)).collect())
    }

    pub fn frames(&self) -> &[usize] {
        &self.0
    }

    pub fn total_frames(&self) -> usize {
        self.0.iter().sum()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Monotonic hard alignment of tokens to frames.
///
/// Token `i` owns the contiguous frames `offsets[i] .. offsets[i] + durations[i]`;
/// every frame belongs to exactly one token and rows are non-decreasing in
/// their first frame. Stored sparsely; [`AlignmentMatrix::to_dense`]
/// materialises the `[T, frames]` 0/1 matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentMatrix {
    durations: Vec<usize>,
    offsets: Vec<usize>,
    total_frames: usize,
}

impl AlignmentMatrix {
    pub fn from_durations(durations: &DurationPrediction) -> Self {
        let durations = durations.frames().to_vec();
        let mut offsets = Vec::with_capacity(durations.len());
        let mut cursor = 0;
        for &d in &durations {
            offsets.push(cursor);
            cursor += d;
        }
        Self {
            durations,
            offsets,
            total_frames: cursor,
        }
    }

    pub fn token_count(&self) -> usize {
        self.durations.len()
    }

    pub fn frame_count(&self) -> usize {
        self.total_frames
    }

    /// Frame range owned by token `i`.
    pub fn row_span(&self, i: usize) -> std::ops::Range<usize> {
        let start = self.offsets[i];
        start..start + self.durations[i]
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.token_count(), self.total_frames));
        for i in 0..self.token_count() {
            dense.slice_mut(s![i, self.row_span(i)]).fill(1.0);
        }
        dense
    }

    /// Upsample token features `[channels, T]` to frames `[channels, frames]`.
    /// Equivalent to `features @ to_dense()`.
    pub fn expand(&self, features: ArrayView2<f32>) -> Result<Array2<f32>, StyleTtsError> {
        if features.ncols() != self.token_count() {
            return Err(StyleTtsError::Synthesis(format!(
                "cannot align {} token columns to {} tokens",
                features.ncols(),
                self.token_count()
            )));
        }
        let mut out = Array2::zeros((features.nrows(), self.total_frames));
        for (i, column) in features.columns().into_iter().enumerate() {
            for frame in self.row_span(i) {
                out.column_mut(frame).assign(&column);
            }
        }
        Ok(out)
    }
}

/// Durations, alignment and prosody features of one segment.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub durations: DurationPrediction,
    pub matrix: AlignmentMatrix,
    /// Style-conditioned prosody features per token, `[channels, T]`.
    pub prosody_features: Array2<f32>,
}

impl Alignment {
    /// Text features upsampled to frames.
    pub fn text_frames(&self, encoding: &TextEncoding) -> Result<Array2<f32>, StyleTtsError> {
        self.matrix.expand(encoding.acoustic.view())
    }

    /// Prosody features upsampled to frames.
    pub fn prosody_frames(&self) -> Result<Array2<f32>, StyleTtsError> {
        self.matrix.expand(self.prosody_features.view())
    }
}

/// Predicts per-token durations and builds the token-to-frame alignment.
pub struct ProsodyAligner<'a> {
    model: &'a StyleTts2Model,
}

impl<'a> ProsodyAligner<'a> {
    pub fn new(model: &'a StyleTts2Model) -> Self {
        Self { model }
    }

    pub fn align(
        &self,
        sequence: &PhonemeSequence,
        encoding: &TextEncoding,
        prosodic_style: &[f32],
    ) -> Result<Alignment, StyleTtsError> {
        let t = sequence.len();
        if encoding.token_count() != t {
            return Err(shape_error("text encoding", t, encoding.token_count()));
        }

        let (features, logits) = self
            .model
            .operators()
            .duration_predictor
            .predict(encoding.duration_features.view(), prosodic_style)?;
        if features.nrows() != t || logits.nrows() != t {
            return Err(StyleTtsError::Synthesis(format!(
                "duration predictor returned {} feature rows and {} logit rows for {t} tokens",
                features.nrows(),
                logits.nrows()
            )));
        }

        let durations = DurationPrediction::from_logits(logits.view())?;
        let matrix = AlignmentMatrix::from_durations(&durations);
        log::debug!("Aligned {t} tokens to {} frames", matrix.frame_count());

        Ok(Alignment {
            durations,
            matrix,
            prosody_features: features.t().to_owned(),
        })
    }
}
