use derive_builder::Builder;

use super::config::ModelConfig;
use super::model::{StyleTtsError, SAMPLE_RATE};
use super::segmenter::DEFAULT_MAX_SEGMENT_LEN;

/// Per-request synthesis settings.
///
/// ```rust
/// use styletts_rs::engines::styletts2::SynthesisParamsBuilder;
///
/// let params = SynthesisParamsBuilder::default()
///     .diffusion_steps(10usize)
///     .seed(42u64)
///     .build()
///     .unwrap();
/// assert_eq!(params.max_segment_len, 125);
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct SynthesisParams {
    /// Weight of the sampled acoustic style against the reference, in `[0, 1]`.
    pub alpha: f32,
    /// Weight of the sampled prosodic style against the reference, in `[0, 1]`.
    pub beta: f32,
    /// Denoising steps of the style sampler, at least 2.
    pub diffusion_steps: usize,
    /// Classifier-free guidance scale. 1.0 disables guidance.
    pub embedding_scale: f32,
    /// Seed for the diffusion noise. `None` draws from OS entropy.
    #[builder(setter(strip_option))]
    pub seed: Option<u64>,
    /// Maximum characters per synthesized segment.
    pub max_segment_len: usize,
    /// Silence inserted between consecutive segments.
    pub inter_segment_silence_secs: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            beta: 0.7,
            diffusion_steps: 5,
            embedding_scale: 1.0,
            seed: None,
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
            inter_segment_silence_secs: 0.3,
        }
    }
}

impl SynthesisParams {
    /// Defaults taken from the model's diffusion and blend settings.
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            alpha: config.blend.alpha,
            beta: config.blend.beta,
            diffusion_steps: config.diffusion.steps,
            embedding_scale: config.diffusion.embedding_scale,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), StyleTtsError> {
        for (name, weight) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(StyleTtsError::Config(format!(
                    "{name} must be within [0, 1] (got {weight})"
                )));
            }
        }
        if self.diffusion_steps < 2 {
            return Err(StyleTtsError::Config(format!(
                "diffusion_steps must be at least 2 (got {})",
                self.diffusion_steps
            )));
        }
        if !self.embedding_scale.is_finite() {
            return Err(StyleTtsError::Config(
                "embedding_scale must be finite".to_string(),
            ));
        }
        if self.max_segment_len == 0 {
            return Err(StyleTtsError::Config(
                "max_segment_len must be positive".to_string(),
            ));
        }
        if !(self.inter_segment_silence_secs.is_finite() && self.inter_segment_silence_secs >= 0.0)
        {
            return Err(StyleTtsError::Config(format!(
                "inter_segment_silence_secs must be non-negative (got {})",
                self.inter_segment_silence_secs
            )));
        }
        Ok(())
    }

    /// Zero samples inserted between two segments.
    pub fn silence_samples(&self) -> usize {
        (self.inter_segment_silence_secs * SAMPLE_RATE as f32).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = SynthesisParams::default();
        params.validate().unwrap();
        assert_eq!(params.silence_samples(), 7200);
    }

    #[test]
    fn builder_fills_unset_fields_with_defaults() {
        let params = SynthesisParamsBuilder::default()
            .alpha(0.1)
            .seed(9u64)
            .build()
            .unwrap();
        assert_eq!(params.alpha, 0.1);
        assert_eq!(params.seed, Some(9));
        assert_eq!(params.beta, 0.7);
        assert_eq!(params.diffusion_steps, 5);
    }

    #[test]
    fn out_of_range_values_are_config_errors() {
        let bad = [
            SynthesisParams {
                alpha: 1.5,
                ..SynthesisParams::default()
            },
            SynthesisParams {
                diffusion_steps: 1,
                ..SynthesisParams::default()
            },
            SynthesisParams {
                max_segment_len: 0,
                ..SynthesisParams::default()
            },
            SynthesisParams {
                inter_segment_silence_secs: -0.1,
                ..SynthesisParams::default()
            },
        ];
        for params in bad {
            assert!(matches!(params.validate(), Err(StyleTtsError::Config(_))));
        }
    }
}
