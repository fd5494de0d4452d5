//! Style diffusion: Karras noise schedule, ADPM2 sampling and the
//! preconditioned, optionally classifier-free-guided denoiser.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::config::DiffusionConfig;
use super::model::{StyleTtsError, StyleTts2Model};
use super::operators::Conditioning;
use super::style::StyleVector;

/// Noise levels `sigma_i` spaced evenly in `sigma^(1/rho)` space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KarrasSchedule {
    pub sigma_min: f32,
    pub sigma_max: f32,
    pub rho: f32,
}

impl KarrasSchedule {
    pub fn from_config(config: &DiffusionConfig) -> Self {
        Self {
            sigma_min: config.sigma_min,
            sigma_max: config.sigma_max,
            rho: config.rho,
        }
    }

    /// `num_steps` levels from `sigma_max` down to `sigma_min`, followed by a
    /// trailing zero.
    pub fn sigmas(&self, num_steps: usize) -> Vec<f32> {
        let inv_rho = 1.0 / self.rho;
        let max_inv = self.sigma_max.powf(inv_rho);
        let min_inv = self.sigma_min.powf(inv_rho);

        let mut sigmas: Vec<f32> = (0..num_steps)
            .map(|i| {
                // endpoints are exact; the rho round trip is not
                if i == 0 {
                    return self.sigma_max;
                }
                if i == num_steps - 1 {
                    return self.sigma_min;
                }
                let t = i as f32 / (num_steps - 1) as f32;
                (max_inv + t * (min_inv - max_inv)).powf(self.rho)
            })
            .collect();
        sigmas.push(0.0);
        sigmas
    }
}

/// Second-order ancestral DPM sampler.
#[derive(Debug, Clone, Copy)]
pub struct Adpm2Sampler {
    rho: f32,
}

impl Default for Adpm2Sampler {
    fn default() -> Self {
        Self { rho: 1.0 }
    }
}

impl Adpm2Sampler {
    /// Split the move to `sigma_next` into a deterministic target
    /// (`sigma_down`), the injected noise (`sigma_up`) and a midpoint.
    fn step_sigmas(&self, sigma: f32, sigma_next: f32) -> (f32, f32, f32) {
        let r = self.rho;
        let sigma_up =
            (sigma_next.powi(2) * (sigma.powi(2) - sigma_next.powi(2)) / sigma.powi(2)).sqrt();
        let sigma_down = (sigma_next.powi(2) - sigma_up.powi(2)).max(0.0).sqrt();
        let sigma_mid = ((sigma.powf(1.0 / r) + sigma_down.powf(1.0 / r)) / 2.0).powf(r);
        (sigma_up, sigma_down, sigma_mid)
    }

    fn step<F>(
        &self,
        x: &[f32],
        denoise: &mut F,
        sigma: f32,
        sigma_next: f32,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>, StyleTtsError>
    where
        F: FnMut(&[f32], f32) -> Result<Vec<f32>, StyleTtsError>,
    {
        let (sigma_up, sigma_down, sigma_mid) = self.step_sigmas(sigma, sigma_next);

        let denoised = denoise(x, sigma)?;
        let d: Vec<f32> = x
            .iter()
            .zip(&denoised)
            .map(|(x, p)| (x - p) / sigma)
            .collect();
        let x_mid: Vec<f32> = x
            .iter()
            .zip(&d)
            .map(|(x, d)| x + d * (sigma_mid - sigma))
            .collect();

        let denoised_mid = denoise(&x_mid, sigma_mid)?;
        Ok(x.iter()
            .zip(x_mid.iter().zip(&denoised_mid))
            .map(|(x, (xm, pm))| {
                let d_mid = (xm - pm) / sigma_mid;
                let noise: f32 = rng.sample(StandardNormal);
                x + d_mid * (sigma_down - sigma) + noise * sigma_up
            })
            .collect())
    }

    /// Run `num_steps - 1` steps starting from `sigmas[0] * noise`.
    ///
    /// `denoise(x, sigma)` returns the model's estimate of the clean sample.
    pub fn sample<F>(
        &self,
        noise: &[f32],
        sigmas: &[f32],
        num_steps: usize,
        mut denoise: F,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>, StyleTtsError>
    where
        F: FnMut(&[f32], f32) -> Result<Vec<f32>, StyleTtsError>,
    {
        if num_steps == 0 || sigmas.len() < num_steps {
            return Err(StyleTtsError::Config(format!(
                "cannot sample {num_steps} steps from {} noise levels",
                sigmas.len()
            )));
        }

        let mut x: Vec<f32> = noise.iter().map(|n| sigmas[0] * n).collect();
        for i in 0..num_steps - 1 {
            x = self.step(&x, &mut denoise, sigmas[i], sigmas[i + 1], rng)?;
        }

        if x.iter().any(|v| !v.is_finite()) {
            return Err(StyleTtsError::Synthesis(
                "style diffusion produced non-finite values".to_string(),
            ));
        }
        Ok(x)
    }
}

/// Karras preconditioning weights at noise level `sigma`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Preconditioning {
    c_skip: f32,
    c_out: f32,
    c_in: f32,
    c_noise: f32,
}

impl Preconditioning {
    fn at(sigma: f32, sigma_data: f32) -> Self {
        let sd2 = sigma_data * sigma_data;
        let s2 = sigma * sigma;
        Self {
            c_skip: sd2 / (s2 + sd2),
            c_out: sigma * sigma_data / (sd2 + s2).sqrt(),
            c_in: 1.0 / (s2 + sd2).sqrt(),
            c_noise: sigma.ln() * 0.25,
        }
    }
}

/// Mix a predicted style with the reference: `alpha` weights the predicted
/// acoustic half, `beta` the predicted prosodic half.
pub fn blend_style(
    predicted: &StyleVector,
    reference: &StyleVector,
    alpha: f32,
    beta: f32,
) -> Result<StyleVector, StyleTtsError> {
    if predicted.len() != reference.len() {
        return Err(StyleTtsError::Synthesis(format!(
            "predicted style has {} values, reference has {}",
            predicted.len(),
            reference.len()
        )));
    }
    let mix = |pred: &[f32], reference: &[f32], w: f32| -> Vec<f32> {
        pred.iter()
            .zip(reference)
            .map(|(p, r)| w * p + (1.0 - w) * r)
            .collect()
    };
    StyleVector::new(
        mix(predicted.acoustic(), reference.acoustic(), alpha),
        mix(predicted.prosodic(), reference.prosodic(), beta),
    )
}

/// Samples a text-conditioned style and blends it with the reference.
pub struct DiffusionStyleSampler<'a> {
    model: &'a StyleTts2Model,
    schedule: KarrasSchedule,
    sampler: Adpm2Sampler,
}

impl<'a> DiffusionStyleSampler<'a> {
    pub fn new(model: &'a StyleTts2Model) -> Self {
        Self {
            model,
            schedule: KarrasSchedule::from_config(&model.config().diffusion),
            sampler: Adpm2Sampler::default(),
        }
    }

    /// Draw a style for `text_embedding` (`[T, embed_dim]`) in `num_steps`
    /// denoising levels, then blend it with `reference`.
    ///
    /// `guidance_scale` of 1 disables classifier-free guidance. The result
    /// depends only on the inputs and the state of `rng`.
    #[allow(clippy::too_many_arguments)]
    pub fn sample(
        &self,
        reference: &StyleVector,
        text_embedding: ArrayView2<f32>,
        num_steps: usize,
        guidance_scale: f32,
        alpha: f32,
        beta: f32,
        rng: &mut StdRng,
    ) -> Result<StyleVector, StyleTtsError> {
        let dim = reference.len();
        let noise: Vec<f32> = (0..dim).map(|_| rng.sample(StandardNormal)).collect();
        let sigmas = self.schedule.sigmas(num_steps);
        let sigma_data = self.model.config().diffusion.sigma_data;
        let denoiser = self.model.operators().denoiser.as_ref();
        let features = reference.as_slice();

        let denoise = |x: &[f32], sigma: f32| -> Result<Vec<f32>, StyleTtsError> {
            let pre = Preconditioning::at(sigma, sigma_data);
            let scaled: Vec<f32> = x.iter().map(|v| v * pre.c_in).collect();

            let mut out = denoiser.denoise(
                &scaled,
                pre.c_noise,
                text_embedding,
                features,
                Conditioning::Text,
            )?;
            if guidance_scale != 1.0 {
                let uncond = denoiser.denoise(
                    &scaled,
                    pre.c_noise,
                    text_embedding,
                    features,
                    Conditioning::Unconditional,
                )?;
                for (o, u) in out.iter_mut().zip(&uncond) {
                    *o = u + (*o - u) * guidance_scale;
                }
            }
            if out.len() != x.len() {
                return Err(StyleTtsError::Synthesis(format!(
                    "denoiser returned {} values, expected {}",
                    out.len(),
                    x.len()
                )));
            }

            Ok(x.iter()
                .zip(&out)
                .map(|(x, o)| pre.c_skip * x + pre.c_out * o)
                .collect())
        };

        let predicted = self
            .sampler
            .sample(&noise, &sigmas, num_steps, denoise, rng)?;
        let predicted = StyleVector::from_concatenated(predicted)?;
        blend_style(&predicted, reference, alpha, beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::styletts2::testing::fake_model;
    use ndarray::Array2;
    use rand::SeedableRng;

    fn reference(dim: usize) -> StyleVector {
        StyleVector::new(
            (0..dim).map(|i| i as f32 * 0.01).collect(),
            (0..dim).map(|i| -(i as f32) * 0.02).collect(),
        )
        .unwrap()
    }

    #[test]
    fn karras_sigmas_descend_to_zero() {
        let schedule = KarrasSchedule {
            sigma_min: 0.0001,
            sigma_max: 3.0,
            rho: 9.0,
        };
        let sigmas = schedule.sigmas(5);
        assert_eq!(sigmas.len(), 6);
        assert_eq!(sigmas[0], 3.0);
        assert_eq!(sigmas[4], 0.0001);
        assert_eq!(sigmas[5], 0.0);
        assert!(sigmas.windows(2).all(|w| w[0] > w[1]));

        assert_eq!(schedule.sigmas(1), vec![3.0, 0.0]);
        assert_eq!(schedule.sigmas(2), vec![3.0, 0.0001, 0.0]);
    }

    #[test]
    fn final_step_to_zero_is_deterministic() {
        let sampler = Adpm2Sampler::default();
        let (up, down, mid) = sampler.step_sigmas(1.0, 0.0);
        assert_eq!(up, 0.0);
        assert_eq!(down, 0.0);
        assert!((mid - 0.5).abs() < 1e-6);
    }

    #[test]
    fn preconditioning_matches_karras_weights() {
        let pre = Preconditioning::at(0.2, 0.2);
        assert!((pre.c_skip - 0.5).abs() < 1e-6);
        assert!((pre.c_out - 0.2 / 2f32.sqrt()).abs() < 1e-6);
        assert!((pre.c_in - 1.0 / (0.08f32).sqrt()).abs() < 1e-4);
        assert!((pre.c_noise - 0.2f32.ln() * 0.25).abs() < 1e-6);
    }

    #[test]
    fn same_seed_gives_same_style() {
        let model = fake_model();
        let sampler = DiffusionStyleSampler::new(&model);
        let reference = reference(model.style_dim());
        let embedding = Array2::from_elem((7, 6), 0.3);

        let draw = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            sampler
                .sample(&reference, embedding.view(), 5, 1.0, 0.3, 0.7, &mut rng)
                .unwrap()
        };
        assert!(draw(42).approx_eq(&draw(42), 0.0));
        assert!(!draw(42).approx_eq(&draw(43), 1e-6));
    }

    #[test]
    fn zero_weights_return_the_reference() {
        let model = fake_model();
        let reference = reference(model.style_dim());
        let embedding = Array2::from_elem((3, 6), 0.1);
        let mut rng = StdRng::seed_from_u64(7);

        let style = DiffusionStyleSampler::new(&model)
            .sample(&reference, embedding.view(), 5, 1.0, 0.0, 0.0, &mut rng)
            .unwrap();
        assert!(style.approx_eq(&reference, 1e-6));
    }

    #[test]
    fn blend_weights_each_half_independently() {
        let predicted = StyleVector::new(vec![1.0, 1.0], vec![1.0, 1.0]).unwrap();
        let reference = StyleVector::new(vec![0.0, 0.0], vec![0.0, 0.0]).unwrap();
        let blended = blend_style(&predicted, &reference, 0.3, 0.7).unwrap();
        assert!((blended.acoustic()[0] - 0.3).abs() < 1e-6);
        assert!((blended.prosodic()[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn guidance_changes_the_sample() {
        let model = fake_model();
        let sampler = DiffusionStyleSampler::new(&model);
        let reference = reference(model.style_dim());
        let embedding = Array2::from_elem((4, 6), 0.5);

        let draw = |scale: f32| {
            let mut rng = StdRng::seed_from_u64(1);
            sampler
                .sample(&reference, embedding.view(), 5, scale, 1.0, 1.0, &mut rng)
                .unwrap()
        };
        assert!(!draw(1.0).approx_eq(&draw(2.0), 1e-6));
    }

    #[test]
    fn non_finite_denoiser_output_is_a_synthesis_error() {
        let sampler = Adpm2Sampler::default();
        let schedule = KarrasSchedule {
            sigma_min: 0.0001,
            sigma_max: 3.0,
            rho: 9.0,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let result = sampler.sample(
            &[0.1, 0.2],
            &schedule.sigmas(3),
            3,
            |x, _| Ok(vec![f32::NAN; x.len()]),
            &mut rng,
        );
        assert!(matches!(result, Err(StyleTtsError::Synthesis(_))));
    }
}
