use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::model::StyleTtsError;

/// Typed contents of a StyleTTS2 model directory's `config.json`.
///
/// Every recognized field is listed here; unknown keys are rejected so a
/// typo fails at load time instead of silently falling back to a default.
/// Relative paths are resolved against the directory holding the config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Text aligner (ASR) checkpoint the operators were exported against.
    pub asr_path: PathBuf,
    /// Pitch extractor (F0) checkpoint the operators were exported against.
    pub f0_path: PathBuf,
    /// Directory holding the BERT-style embedder operator.
    pub plbert_dir: PathBuf,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub operators: OperatorFiles,
    #[serde(default)]
    pub diffusion: DiffusionConfig,
    #[serde(default)]
    pub blend: BlendConfig,
    /// Length of each style half (acoustic and prosodic).
    #[serde(default = "default_style_dim")]
    pub style_dim: usize,
    #[serde(default)]
    pub mel: MelConfig,
    /// Frames quieter than this many dB below the loudest frame are trimmed
    /// from both ends of a reference clip.
    #[serde(default = "default_trim_top_db")]
    pub trim_top_db: f32,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// espeak-ng voice used for grapheme-to-phoneme conversion.
    #[serde(default = "default_language")]
    pub language: String,
    /// Optional symbol table override (`symbol -> token id`).
    #[serde(default)]
    pub vocab: Option<HashMap<String, i64>>,
}

/// Decoder family. Only HiFi-GAN exports are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    #[default]
    Hifigan,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecoderConfig {
    #[serde(rename = "type", default)]
    pub kind: DecoderKind,
}

/// ONNX file name of each operator, relative to the model directory
/// (the BERT embedder is relative to `plbert_dir`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperatorFiles {
    pub text_encoder: String,
    pub bert: String,
    pub bert_encoder: String,
    pub style_encoder: String,
    pub predictor_encoder: String,
    pub diffusion: String,
    pub duration_predictor: String,
    pub pitch_energy: String,
    pub decoder: String,
}

impl Default for OperatorFiles {
    fn default() -> Self {
        Self {
            text_encoder: "text_encoder.onnx".to_string(),
            bert: "bert.onnx".to_string(),
            bert_encoder: "bert_encoder.onnx".to_string(),
            style_encoder: "style_encoder.onnx".to_string(),
            predictor_encoder: "predictor_encoder.onnx".to_string(),
            diffusion: "diffusion.onnx".to_string(),
            duration_predictor: "duration_predictor.onnx".to_string(),
            pitch_energy: "pitch_energy.onnx".to_string(),
            decoder: "decoder.onnx".to_string(),
        }
    }
}

/// Karras noise schedule and k-diffusion preconditioning constants.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiffusionConfig {
    pub sigma_min: f32,
    pub sigma_max: f32,
    /// Schedule curvature exponent.
    pub rho: f32,
    pub sigma_data: f32,
    /// Default number of sampling steps.
    pub steps: usize,
    /// Default classifier-free guidance scale.
    pub embedding_scale: f32,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            sigma_min: 0.0001,
            sigma_max: 3.0,
            rho: 9.0,
            sigma_data: 0.2,
            steps: 5,
            embedding_scale: 1.0,
        }
    }
}

/// Default interpolation weights between sampled and reference style halves.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlendConfig {
    pub alpha: f32,
    pub beta: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            beta: 0.7,
        }
    }
}

/// Log-mel front end used for style extraction.
///
/// `filter_sample_rate` is the rate the mel filter bank is laid out for. The
/// style encoders were trained with a 16 kHz filter bank applied to 24 kHz
/// audio, so the two rates intentionally differ.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MelConfig {
    pub n_mels: usize,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub filter_sample_rate: u32,
    pub mean: f32,
    pub std: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            n_mels: 80,
            n_fft: 2048,
            win_length: 1200,
            hop_length: 300,
            filter_sample_rate: 16000,
            mean: -4.0,
            std: 4.0,
        }
    }
}

/// Budgets for the external calls made by the orchestrator.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub audio_load_secs: f64,
    pub phonemize_secs: f64,
    pub inference_secs: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            audio_load_secs: 30.0,
            phonemize_secs: 30.0,
            inference_secs: 120.0,
        }
    }
}

impl TimeoutConfig {
    pub fn audio_load(&self) -> Duration {
        Duration::from_secs_f64(self.audio_load_secs)
    }

    pub fn phonemize(&self) -> Duration {
        Duration::from_secs_f64(self.phonemize_secs)
    }

    pub fn inference(&self) -> Duration {
        Duration::from_secs_f64(self.inference_secs)
    }
}

fn default_style_dim() -> usize {
    128
}

fn default_trim_top_db() -> f32 {
    30.0
}

fn default_language() -> String {
    "en-us".to_string()
}

impl ModelConfig {
    /// Build a configuration with default tuning and the given checkpoint paths.
    pub fn new(asr_path: PathBuf, f0_path: PathBuf, plbert_dir: PathBuf) -> Self {
        Self {
            asr_path,
            f0_path,
            plbert_dir,
            decoder: DecoderConfig::default(),
            operators: OperatorFiles::default(),
            diffusion: DiffusionConfig::default(),
            blend: BlendConfig::default(),
            style_dim: default_style_dim(),
            mel: MelConfig::default(),
            trim_top_db: default_trim_top_db(),
            timeouts: TimeoutConfig::default(),
            language: default_language(),
            vocab: None,
        }
    }

    /// Read, resolve and fully validate a `config.json`.
    pub fn from_file(path: &Path) -> Result<Self, StyleTtsError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StyleTtsError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut config: ModelConfig = serde_json::from_str(&content).map_err(|e| {
            StyleTtsError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        config.check_files()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.asr_path, &mut self.f0_path, &mut self.plbert_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Check value ranges. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), StyleTtsError> {
        let d = &self.diffusion;
        if !(d.sigma_min > 0.0 && d.sigma_max > d.sigma_min) {
            return Err(StyleTtsError::Config(format!(
                "diffusion sigmas must satisfy 0 < sigma_min < sigma_max (got {} and {})",
                d.sigma_min, d.sigma_max
            )));
        }
        if d.rho <= 0.0 || d.sigma_data <= 0.0 {
            return Err(StyleTtsError::Config(
                "diffusion rho and sigma_data must be positive".to_string(),
            ));
        }
        if d.steps < 2 {
            return Err(StyleTtsError::Config(format!(
                "diffusion steps must be at least 2 (got {})",
                d.steps
            )));
        }
        for (name, weight) in [("alpha", self.blend.alpha), ("beta", self.blend.beta)] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(StyleTtsError::Config(format!(
                    "blend {name} must be within [0, 1] (got {weight})"
                )));
            }
        }
        if self.style_dim == 0 {
            return Err(StyleTtsError::Config("style_dim must be positive".to_string()));
        }

        let m = &self.mel;
        if m.n_mels == 0 || m.hop_length == 0 || m.win_length == 0 || m.win_length > m.n_fft {
            return Err(StyleTtsError::Config(format!(
                "invalid mel parameters: n_mels={}, n_fft={}, win_length={}, hop_length={}",
                m.n_mels, m.n_fft, m.win_length, m.hop_length
            )));
        }
        if m.std == 0.0 || m.filter_sample_rate == 0 {
            return Err(StyleTtsError::Config(
                "mel std and filter_sample_rate must be non-zero".to_string(),
            ));
        }
        if self.trim_top_db <= 0.0 {
            return Err(StyleTtsError::Config("trim_top_db must be positive".to_string()));
        }

        let t = &self.timeouts;
        for (name, secs) in [
            ("audio_load_secs", t.audio_load_secs),
            ("phonemize_secs", t.phonemize_secs),
            ("inference_secs", t.inference_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(StyleTtsError::Config(format!(
                    "timeout {name} must be a positive number of seconds (got {secs})"
                )));
            }
        }
        if self.language.trim().is_empty() {
            return Err(StyleTtsError::Config("language must not be empty".to_string()));
        }
        Ok(())
    }

    /// Check that the checkpoint files referenced by the config exist.
    pub fn check_files(&self) -> Result<(), StyleTtsError> {
        let required = [
            ("asr_path", &self.asr_path),
            ("f0_path", &self.f0_path),
            ("plbert_dir", &self.plbert_dir),
        ];
        for (field, path) in required {
            if !path.exists() {
                return Err(StyleTtsError::Config(format!(
                    "{field} not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("config.json");
        fs::write(&path, json).unwrap();
        path
    }

    fn touch_checkpoints(dir: &Path) {
        fs::write(dir.join("asr.pth"), b"").unwrap();
        fs::write(dir.join("f0.t7"), b"").unwrap();
        fs::create_dir_all(dir.join("plbert")).unwrap();
    }

    #[test]
    fn minimal_config_gets_defaults_and_resolved_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch_checkpoints(dir.path());
        let path = write_config(
            dir.path(),
            r#"{"asr_path": "asr.pth", "f0_path": "f0.t7", "plbert_dir": "plbert"}"#,
        );

        let config = ModelConfig::from_file(&path).unwrap();
        assert_eq!(config.asr_path, dir.path().join("asr.pth"));
        assert_eq!(config.decoder.kind, DecoderKind::Hifigan);
        assert_eq!(config.diffusion.steps, 5);
        assert_eq!(config.blend.alpha, 0.3);
        assert_eq!(config.blend.beta, 0.7);
        assert_eq!(config.mel.hop_length, 300);
        assert_eq!(config.style_dim, 128);
    }

    #[test]
    fn missing_required_field_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"asr_path": "asr.pth", "f0_path": "f0.t7"}"#);
        let err = ModelConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, StyleTtsError::Config(msg) if msg.contains("plbert_dir")));
    }

    #[test]
    fn missing_checkpoint_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"asr_path": "asr.pth", "f0_path": "f0.t7", "plbert_dir": "plbert"}"#,
        );
        let err = ModelConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, StyleTtsError::Config(msg) if msg.contains("asr_path")));
    }

    #[test]
    fn unknown_fields_and_decoders_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch_checkpoints(dir.path());

        let path = write_config(
            dir.path(),
            r#"{"asr_path": "asr.pth", "f0_path": "f0.t7", "plbert_dir": "plbert", "ASR_config": "x"}"#,
        );
        assert!(matches!(
            ModelConfig::from_file(&path),
            Err(StyleTtsError::Config(_))
        ));

        let path = write_config(
            dir.path(),
            r#"{"asr_path": "asr.pth", "f0_path": "f0.t7", "plbert_dir": "plbert",
                "decoder": {"type": "istftnet"}}"#,
        );
        assert!(matches!(
            ModelConfig::from_file(&path),
            Err(StyleTtsError::Config(_))
        ));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let mut config = ModelConfig::new("a".into(), "b".into(), "c".into());
        assert!(config.validate().is_ok());

        config.blend.alpha = 1.5;
        assert!(config.validate().is_err());
        config.blend.alpha = 0.3;

        config.diffusion.steps = 1;
        assert!(config.validate().is_err());
        config.diffusion.steps = 5;

        config.timeouts.inference_secs = 0.0;
        assert!(config.validate().is_err());
    }
}
