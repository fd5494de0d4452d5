use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{SynthesisEngine, SynthesisResult};

use super::model::{StyleTtsError, StyleTts2Model};
use super::onnx::LoadOptions;
use super::orchestrator::SynthesisOrchestrator;
use super::params::SynthesisParams;
use super::phonemizer::EspeakConfig;
use super::voices::VoiceStore;

/// Parameters for configuring StyleTTS2 model loading.
#[derive(Debug, Clone, Default)]
pub struct StyleTts2ModelParams {
    /// Number of CPU threads per ONNX session.
    /// `None` uses the ORT default (typically all available cores).
    pub num_threads: Option<usize>,
    /// Directory for caching Level3-optimized graphs, one per operator.
    ///
    /// Always point this at a writable location; bundled resource
    /// directories may be read-only.
    pub optimized_model_cache_dir: Option<PathBuf>,
    /// Directory holding the reference voices. Defaults to
    /// `<model_dir>/reference_audio`.
    pub reference_dir: Option<PathBuf>,
}

/// Parameters for configuring a StyleTTS2 synthesis request.
#[derive(Debug, Clone)]
pub struct StyleTts2InferenceParams {
    /// Catalogued voice id (e.g. `"3"`, `"amused"`, `"sleepy"`).
    pub voice: String,
    /// Reference recording to clone instead of a catalogued voice.
    pub reference_audio: Option<PathBuf>,
    /// Synthesis knobs. `None` uses the loaded model's configured defaults.
    pub synthesis: Option<SynthesisParams>,
}

impl Default for StyleTts2InferenceParams {
    fn default() -> Self {
        Self {
            voice: "3".to_string(),
            reference_audio: None,
            synthesis: None,
        }
    }
}

/// StyleTTS2 text-to-speech engine.
///
/// Speaks arbitrary-length text in the style of a reference recording.
/// Requires espeak-ng for phonemization.
///
/// ```rust,no_run
/// use styletts_rs::{SynthesisEngine, engines::styletts2::StyleTts2Engine};
/// use std::path::PathBuf;
///
/// let mut engine = StyleTts2Engine::new();
/// engine.load_model(&PathBuf::from("models/styletts2"))?;
/// let result = engine.synthesize("Hello, world!", None)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct StyleTts2Engine {
    orchestrator: Option<SynthesisOrchestrator>,
    voices: Option<VoiceStore>,
    model_path: Option<PathBuf>,
    espeak: EspeakConfig,
}

impl Default for StyleTts2Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleTts2Engine {
    /// Create a new engine that uses `espeak-ng` from PATH.
    pub fn new() -> Self {
        Self::with_espeak(None, None)
    }

    /// Create a new engine with explicit espeak-ng binary and data paths.
    pub fn with_espeak(bin_path: Option<PathBuf>, data_path: Option<PathBuf>) -> Self {
        Self {
            orchestrator: None,
            voices: None,
            model_path: None,
            espeak: EspeakConfig {
                bin_path,
                data_path,
            },
        }
    }

    /// Catalogued voice ids (empty until a model is loaded).
    pub fn list_voices(&self) -> Vec<&str> {
        self.voices
            .as_ref()
            .map(VoiceStore::list_voices)
            .unwrap_or_default()
    }

    pub fn orchestrator(&self) -> Option<&SynthesisOrchestrator> {
        self.orchestrator.as_ref()
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    /// Synthesis defaults from the loaded model's config, or the built-in
    /// defaults when no model is loaded.
    pub fn default_synthesis_params(&self) -> SynthesisParams {
        self.orchestrator
            .as_ref()
            .map(|o| SynthesisParams::from_config(o.model().config()))
            .unwrap_or_default()
    }

    fn attach(&mut self, model: StyleTts2Model, voices: VoiceStore, model_path: &Path) {
        self.voices = Some(voices);
        self.orchestrator = Some(SynthesisOrchestrator::new(Arc::new(model)));
        self.model_path = Some(model_path.to_path_buf());
    }

    fn run(
        &self,
        text: &str,
        params: &StyleTts2InferenceParams,
    ) -> Result<SynthesisResult, StyleTtsError> {
        let orchestrator = self
            .orchestrator
            .as_ref()
            .ok_or(StyleTtsError::ModelNotLoaded)?;

        let synthesis = params
            .synthesis
            .clone()
            .unwrap_or_else(|| self.default_synthesis_params());

        if let Some(reference) = &params.reference_audio {
            return orchestrator.synthesize(text, reference, &synthesis);
        }

        let voices = self.voices.as_ref().ok_or(StyleTtsError::ModelNotLoaded)?;
        let style = voices.style_for(&params.voice, |path| {
            orchestrator.extract_style(path).map_err(|e| {
                let e = e.classify();
                log::error!("Style extraction for voice '{}' failed: {e}", params.voice);
                e
            })
        })?;
        orchestrator.synthesize_with_style(text, &style, &synthesis, &CancellationToken::new())
    }
}

impl Drop for StyleTts2Engine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for StyleTts2Engine {
    type SynthesisParams = StyleTts2InferenceParams;
    type ModelParams = StyleTts2ModelParams;

    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let options = LoadOptions {
            num_threads: params.num_threads,
            optimized_cache_dir: params.optimized_model_cache_dir,
            espeak: self.espeak.clone(),
        };
        let model = StyleTts2Model::load(model_path, &options)?;
        let reference_dir = params
            .reference_dir
            .unwrap_or_else(|| model_path.join("reference_audio"));

        self.attach(
            model,
            VoiceStore::default_catalogue(&reference_dir),
            model_path,
        );
        Ok(())
    }

    fn unload_model(&mut self) {
        self.orchestrator = None;
        self.voices = None;
        self.model_path = None;
    }

    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>> {
        let params = params.unwrap_or_default();
        Ok(self.run(text, &params)?)
    }
}
