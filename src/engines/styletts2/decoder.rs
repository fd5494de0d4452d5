use ndarray::{s, Array2};

use super::model::{StyleTtsError, StyleTts2Model};
use super::style::StyleVector;

/// Delay features by one frame: frame 0 is kept and every later frame takes
/// the value of its predecessor. The HiFi-GAN decoder was trained on features
/// with this offset.
pub fn shift_right_one_frame(frames: &mut Array2<f32>) {
    let n = frames.ncols();
    if n < 2 {
        return;
    }
    let previous = frames.slice(s![.., ..n - 1]).to_owned();
    frames.slice_mut(s![.., 1..]).assign(&previous);
}

/// Renders frame-level features and a style into a waveform.
pub struct WaveformDecoder<'a> {
    model: &'a StyleTts2Model,
}

impl<'a> WaveformDecoder<'a> {
    pub fn new(model: &'a StyleTts2Model) -> Self {
        Self { model }
    }

    /// Decode aligned text features `[channels, frames]` and prosody features
    /// `[channels, frames]` into samples at the model rate.
    ///
    /// Pitch and energy are predicted from the prosody features and the
    /// prosodic style half; the acoustic half drives the vocoder.
    pub fn decode(
        &self,
        mut text_frames: Array2<f32>,
        mut prosody_frames: Array2<f32>,
        style: &StyleVector,
    ) -> Result<Vec<f32>, StyleTtsError> {
        let frames = text_frames.ncols();
        if frames == 0 || prosody_frames.ncols() != frames {
            return Err(StyleTtsError::Synthesis(format!(
                "decoder needs matching non-empty frame counts (text {frames}, prosody {})",
                prosody_frames.ncols()
            )));
        }

        shift_right_one_frame(&mut prosody_frames);
        shift_right_one_frame(&mut text_frames);

        let ops = self.model.operators();
        let (f0, energy) = ops
            .pitch_energy
            .predict(prosody_frames.view(), style.prosodic())?;
        if f0.len() != energy.len() || f0.is_empty() {
            return Err(StyleTtsError::Synthesis(format!(
                "pitch/energy predictor returned {} and {} values",
                f0.len(),
                energy.len()
            )));
        }

        let samples = ops
            .vocoder
            .decode(text_frames.view(), &f0, &energy, style.acoustic())?;
        if samples.iter().any(|v| !v.is_finite()) {
            return Err(StyleTtsError::Synthesis(
                "decoder produced non-finite samples".to_string(),
            ));
        }
        log::debug!("Decoded {frames} frames into {} samples", samples.len());
        Ok(samples)
    }
}
