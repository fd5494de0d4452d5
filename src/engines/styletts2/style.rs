use std::path::Path;

use super::audio::{load_wav, resample, trim_silence, MelSpectrogram};
use super::model::{StyleTtsError, StyleTts2Model, SAMPLE_RATE};

/// Fixed-length style embedding: an acoustic half followed by a prosodic half.
///
/// Immutable once built; clone it to share across segments.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleVector {
    values: Vec<f32>,
    half: usize,
}

impl StyleVector {
    /// Concatenate an acoustic and a prosodic half of equal length.
    pub fn new(acoustic: Vec<f32>, prosodic: Vec<f32>) -> Result<Self, StyleTtsError> {
        if acoustic.len() != prosodic.len() || acoustic.is_empty() {
            return Err(StyleTtsError::Synthesis(format!(
                "style halves must be non-empty and equal length (got {} and {})",
                acoustic.len(),
                prosodic.len()
            )));
        }
        let mut values = acoustic;
        values.extend(prosodic);
        Self::from_concatenated(values)
    }

    /// Wrap an already concatenated `[acoustic | prosodic]` vector.
    pub fn from_concatenated(values: Vec<f32>) -> Result<Self, StyleTtsError> {
        if values.is_empty() || values.len() % 2 != 0 {
            return Err(StyleTtsError::Synthesis(format!(
                "style vector length must be even and non-zero (got {})",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StyleTtsError::Synthesis(
                "style vector contains non-finite values".to_string(),
            ));
        }
        let half = values.len() / 2;
        Ok(Self { values, half })
    }

    pub fn acoustic(&self) -> &[f32] {
        &self.values[..self.half]
    }

    pub fn prosodic(&self) -> &[f32] {
        &self.values[self.half..]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn half_dim(&self) -> usize {
        self.half
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Element-wise equality within `tolerance`.
    pub fn approx_eq(&self, other: &StyleVector, tolerance: f32) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Derives a [`StyleVector`] from a reference recording.
pub struct StyleExtractor<'a> {
    model: &'a StyleTts2Model,
    mel: MelSpectrogram,
}

impl<'a> StyleExtractor<'a> {
    pub fn new(model: &'a StyleTts2Model) -> Self {
        Self {
            model,
            mel: MelSpectrogram::new(&model.config().mel),
        }
    }

    /// Load a reference WAV and compute its style.
    pub fn extract_style(&self, reference_audio: &Path) -> Result<StyleVector, StyleTtsError> {
        if !reference_audio.is_file() {
            return Err(StyleTtsError::AudioLoad(format!(
                "reference audio not found: {}",
                reference_audio.display()
            )));
        }
        let (samples, rate) = load_wav(reference_audio)?;
        log::debug!(
            "Loaded reference {} ({} samples @ {rate} Hz)",
            reference_audio.display(),
            samples.len()
        );
        self.extract_from_samples(&samples, rate)
    }

    /// Compute a style from in-memory mono samples.
    pub fn extract_from_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<StyleVector, StyleTtsError> {
        let samples = resample(samples, sample_rate, SAMPLE_RATE)?;
        let trimmed = trim_silence(&samples, self.model.config().trim_top_db);
        if trimmed.is_empty() {
            return Err(StyleTtsError::AudioLoad(
                "reference audio is empty after silence trimming".to_string(),
            ));
        }

        let mel_config = &self.model.config().mel;
        let mel = self
            .mel
            .log_normalized(trimmed, mel_config.mean, mel_config.std);

        let encoder = self.model.operators().style_encoder.as_ref();
        let (acoustic, prosodic) = {
            let _device = self
                .model
                .acquire_device(self.model.config().timeouts.inference())?;
            (
                encoder.encode_acoustic(mel.view())?,
                encoder.encode_prosodic(mel.view())?,
            )
        };

        let dim = self.model.style_dim();
        if acoustic.len() != dim || prosodic.len() != dim {
            return Err(StyleTtsError::Synthesis(format!(
                "style encoders returned {} and {} values, expected {dim} each",
                acoustic.len(),
                prosodic.len()
            )));
        }

        StyleVector::new(acoustic, prosodic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::styletts2::testing::{fake_model, write_tone_wav};

    #[test]
    fn halves_are_split_at_the_midpoint() {
        let style = StyleVector::new(vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();
        assert_eq!(style.acoustic(), &[1.0, 2.0]);
        assert_eq!(style.prosodic(), &[3.0, 4.0]);
        assert_eq!(style.len(), 4);
    }

    #[test]
    fn rejects_mismatched_or_non_finite_values() {
        assert!(StyleVector::new(vec![1.0], vec![]).is_err());
        assert!(StyleVector::from_concatenated(vec![1.0, 2.0, 3.0]).is_err());
        assert!(StyleVector::from_concatenated(vec![1.0, f32::NAN]).is_err());
    }

    #[test]
    fn same_reference_gives_same_style() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone_wav(dir.path(), "ref.wav", 24000, 1.0);
        let model = fake_model();
        let extractor = StyleExtractor::new(&model);

        let a = extractor.extract_style(&path).unwrap();
        let b = extractor.extract_style(&path).unwrap();
        assert_eq!(a.len(), 2 * model.style_dim());
        assert!(a.approx_eq(&b, 1e-6));
    }

    #[test]
    fn resampled_reference_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone_wav(dir.path(), "ref16k.wav", 16000, 0.5);
        let model = fake_model();
        let style = StyleExtractor::new(&model).extract_style(&path).unwrap();
        assert_eq!(style.half_dim(), model.style_dim());
    }

    #[test]
    fn silent_or_missing_reference_is_an_audio_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let silent = dir.path().join("silent.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&silent, spec).unwrap();
        for _ in 0..24000 {
            writer.write_sample(0.0f32).unwrap();
        }
        writer.finalize().unwrap();

        let model = fake_model();
        let extractor = StyleExtractor::new(&model);
        assert!(matches!(
            extractor.extract_style(&silent),
            Err(StyleTtsError::AudioLoad(_))
        ));
        assert!(matches!(
            extractor.extract_style(&dir.path().join("missing.wav")),
            Err(StyleTtsError::AudioLoad(_))
        ));
    }
}
