use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::SynthesisResult;

use super::aligner::{ProsodyAligner, TextEncoding};
use super::decoder::WaveformDecoder;
use super::diffusion::DiffusionStyleSampler;
use super::model::{StyleTtsError, StyleTts2Model, SAMPLE_RATE, TRAILING_TRIM_SAMPLES};
use super::params::SynthesisParams;
use super::phonemizer::{PhonemeSequence, Phonemizer};
use super::segmenter::segment;
use super::style::{StyleExtractor, StyleVector};

/// Progress of one synthesis request. Every request ends in `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisState {
    Init,
    Segmenting,
    PerSegmentSynthesis { segment: usize, total: usize },
    Concatenating,
    Trimming,
    Done,
    Failed,
}

/// Drives text through segmentation, phonemization, style sampling,
/// alignment and decoding, then stitches the segments together.
///
/// Cheap to clone; all clones share one model and its device lock.
#[derive(Clone)]
pub struct SynthesisOrchestrator {
    model: Arc<StyleTts2Model>,
}

impl SynthesisOrchestrator {
    pub fn new(model: Arc<StyleTts2Model>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<StyleTts2Model> {
        &self.model
    }

    /// Compute the style of a reference recording within the audio-load budget.
    pub fn extract_style(&self, reference_audio: &Path) -> Result<StyleVector, StyleTtsError> {
        let model = Arc::clone(&self.model);
        let path = reference_audio.to_path_buf();
        run_with_timeout(
            "audio load",
            self.model.config().timeouts.audio_load(),
            move || StyleExtractor::new(&model).extract_style(&path),
        )
    }

    /// Synthesize `text` in the voice of `reference_audio`.
    pub fn synthesize(
        &self,
        text: &str,
        reference_audio: &Path,
        params: &SynthesisParams,
    ) -> Result<SynthesisResult, StyleTtsError> {
        let style = self.extract_style(reference_audio).map_err(|e| {
            let e = e.classify();
            log::error!("Style extraction failed: {e}");
            e
        })?;
        self.synthesize_with_style(text, &style, params, &CancellationToken::new())
    }

    /// Synthesize `text` with a precomputed reference style.
    ///
    /// `cancel` is checked before every segment. A failure in any segment
    /// fails the whole request; no partial audio is returned.
    pub fn synthesize_with_style(
        &self,
        text: &str,
        style: &StyleVector,
        params: &SynthesisParams,
        cancel: &CancellationToken,
    ) -> Result<SynthesisResult, StyleTtsError> {
        let mut state = SynthesisState::Init;
        let result = self.run(text, style, params, cancel, &mut state);
        match result {
            Ok(samples) => {
                advance(&mut state, SynthesisState::Done);
                Ok(SynthesisResult {
                    samples,
                    sample_rate: SAMPLE_RATE,
                })
            }
            Err(e) => {
                let failed_in = state;
                advance(&mut state, SynthesisState::Failed);
                let e = e.classify();
                log::error!("Synthesis failed during {failed_in:?}: {e}");
                Err(e)
            }
        }
    }

    fn run(
        &self,
        text: &str,
        style: &StyleVector,
        params: &SynthesisParams,
        cancel: &CancellationToken,
        state: &mut SynthesisState,
    ) -> Result<Vec<f32>, StyleTtsError> {
        params.validate()?;
        if style.half_dim() != self.model.style_dim() {
            return Err(StyleTtsError::Synthesis(format!(
                "reference style has {} values per half, model expects {}",
                style.half_dim(),
                self.model.style_dim()
            )));
        }

        advance(state, SynthesisState::Segmenting);
        let segments: Vec<&str> = segment(text, params.max_segment_len)
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if segments.is_empty() {
            return Err(StyleTtsError::Synthesis("no text to synthesize".to_string()));
        }
        log::info!(
            "Synthesizing {} characters in {} segment(s)",
            text.chars().count(),
            segments.len()
        );

        let total = segments.len();
        let mut buffers = Vec::with_capacity(total);
        for (index, text) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(StyleTtsError::Cancelled);
            }
            advance(
                state,
                SynthesisState::PerSegmentSynthesis {
                    segment: index,
                    total,
                },
            );

            let sequence = self.phonemize(text)?;
            let samples = self.infer(sequence, style, params, index)?;
            log::debug!("Segment {}/{total}: {} samples", index + 1, samples.len());
            buffers.push(samples);
        }
        if cancel.is_cancelled() {
            return Err(StyleTtsError::Cancelled);
        }

        advance(state, SynthesisState::Concatenating);
        if buffers.iter().all(Vec::is_empty) {
            return Err(StyleTtsError::Synthesis(
                "decoder produced no audio".to_string(),
            ));
        }
        let mut audio = concatenate(&buffers, params.silence_samples());

        advance(state, SynthesisState::Trimming);
        trim_trailing(&mut audio, TRAILING_TRIM_SAMPLES);
        Ok(audio)
    }

    fn phonemize(&self, text: &str) -> Result<PhonemeSequence, StyleTtsError> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        run_with_timeout(
            "phonemize",
            self.model.config().timeouts.phonemize(),
            move || Phonemizer::new(&model).to_phonemes(&text),
        )
    }

    fn infer(
        &self,
        sequence: PhonemeSequence,
        style: &StyleVector,
        params: &SynthesisParams,
        index: usize,
    ) -> Result<Vec<f32>, StyleTtsError> {
        let model = Arc::clone(&self.model);
        let style = style.clone();
        let params = params.clone();
        let budget = self.model.config().timeouts.inference();
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        };

        run_with_timeout("inference", budget, move || {
            let _device = model.acquire_device(budget)?;
            let encoding = TextEncoding::encode(&model, &sequence)?;
            let sampled = DiffusionStyleSampler::new(&model).sample(
                &style,
                encoding.embedding.view(),
                params.diffusion_steps,
                params.embedding_scale,
                params.alpha,
                params.beta,
                &mut rng,
            )?;
            let alignment =
                ProsodyAligner::new(&model).align(&sequence, &encoding, sampled.prosodic())?;
            let text_frames = alignment.text_frames(&encoding)?;
            let prosody_frames = alignment.prosody_frames()?;
            WaveformDecoder::new(&model).decode(text_frames, prosody_frames, &sampled)
        })
    }
}

fn advance(state: &mut SynthesisState, next: SynthesisState) {
    log::trace!("Synthesis state {state:?} -> {next:?}");
    *state = next;
}

/// Join segment buffers with `silence` zero samples between consecutive ones.
fn concatenate(buffers: &[Vec<f32>], silence: usize) -> Vec<f32> {
    let total: usize =
        buffers.iter().map(Vec::len).sum::<usize>() + silence * buffers.len().saturating_sub(1);
    let mut audio = Vec::with_capacity(total);
    for (i, buffer) in buffers.iter().enumerate() {
        if i > 0 {
            audio.resize(audio.len() + silence, 0.0);
        }
        audio.extend_from_slice(buffer);
    }
    audio
}

/// Drop `count` samples from the end. A buffer no longer than `count` is
/// silenced instead of emptied.
fn trim_trailing(audio: &mut Vec<f32>, count: usize) {
    if audio.len() > count {
        audio.truncate(audio.len() - count);
    } else {
        log::warn!(
            "Output of {} samples is shorter than the trailing trim, returning silence",
            audio.len()
        );
        audio.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Run `job` on a worker thread and wait at most `budget` for its result.
///
/// On timeout the worker is left to finish on its own and its result is
/// discarded.
pub(crate) fn run_with_timeout<T, F>(
    stage: &'static str,
    budget: Duration,
    job: F,
) -> Result<T, StyleTtsError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StyleTtsError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("styletts2-{}", stage.replace(' ', "-")))
        .spawn(move || {
            let _ = tx.send(job());
        })?;

    match rx.recv_timeout(budget) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!("{stage} exceeded {budget:?}");
            Err(StyleTtsError::Timeout { stage, budget })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(StyleTtsError::Synthesis(format!(
            "{stage} worker exited without a result"
        ))),
    }
}
