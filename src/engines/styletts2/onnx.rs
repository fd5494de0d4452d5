//! ONNX Runtime implementations of the operator traits and model-directory
//! loading.
//!
//! Each sub-network is exported to its own graph. Inputs are bound by name;
//! the names below are resolved against the graph at load time.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2};
use ort::execution_providers::CPUExecutionProvider;
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;

use super::config::ModelConfig;
use super::model::{StyleTtsError, StyleTts2Model};
use super::operators::{
    Conditioning, DurationPredictor, Operators, PitchEnergyPredictor, StyleDenoiser,
    StyleEncoder, TextEmbedder, TextEncoder, Vocoder,
};
use super::phonemizer::{EspeakBackend, EspeakConfig};
use super::vocab::Vocab;

/// Prefix left on input names by graphs exported from a `DataParallel`
/// wrapped module.
const WRAPPED_MODULE_PREFIX: &str = "module.";

/// Options for [`StyleTts2Model::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Intra- and inter-op threads per session. `None` uses the ORT default.
    pub num_threads: Option<usize>,
    /// Directory for Level3-optimized graphs, one file per operator.
    ///
    /// The first load optimizes and writes each graph here; later loads read
    /// the optimized graphs with optimization disabled.
    pub optimized_cache_dir: Option<PathBuf>,
    pub espeak: EspeakConfig,
}

/// Collect every output of a session run as an owned f32 array.
macro_rules! f32_outputs {
    ($outputs:expr) => {
        $outputs
            .iter()
            .map(|(_, value)| value.try_extract_array::<f32>().map(|a| a.to_owned()))
            .collect::<Result<Vec<ArrayD<f32>>, _>>()
    };
}

/// One ONNX graph with its resolved input names.
struct OnnxOperator {
    name: &'static str,
    session: Mutex<Session>,
    inputs: Vec<String>,
}

impl OnnxOperator {
    fn load(
        name: &'static str,
        path: &Path,
        expected_inputs: &[&str],
        options: &LoadOptions,
    ) -> Result<Self, StyleTtsError> {
        if !path.is_file() {
            return Err(StyleTtsError::ModelLoad(format!(
                "{name} graph not found at {}",
                path.display()
            )));
        }
        log::info!("Loading {name} from {}", path.display());

        let cache = options
            .optimized_cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}.optimized.onnx")));
        let session = init_session(path, options.num_threads, cache.as_deref())?;

        let available: Vec<String> = session
            .inputs()
            .iter()
            .map(|input| input.name().to_string())
            .collect();
        let inputs = resolve_input_names(name, &available, expected_inputs)?;
        log::debug!("{name}: inputs {inputs:?}");

        Ok(Self {
            name,
            session: Mutex::new(session),
            inputs,
        })
    }

    fn input(&self, index: usize) -> &str {
        &self.inputs[index]
    }

    fn output(
        &self,
        outputs: &mut [ArrayD<f32>],
        index: usize,
    ) -> Result<ArrayD<f32>, StyleTtsError> {
        if index >= outputs.len() {
            return Err(StyleTtsError::Synthesis(format!(
                "{} produced {} outputs, expected at least {}",
                self.name,
                outputs.len(),
                index + 1
            )));
        }
        Ok(std::mem::take(&mut outputs[index]))
    }
}

/// Map each expected input to a graph input name.
///
/// Names are first matched exactly. If any is missing, the match is retried
/// once with the wrapped-module prefix stripped from the graph's names.
fn resolve_input_names(
    operator: &str,
    available: &[String],
    expected: &[&str],
) -> Result<Vec<String>, StyleTtsError> {
    let strict: Option<Vec<String>> = expected
        .iter()
        .map(|want| available.iter().find(|name| name == want).cloned())
        .collect();
    if let Some(names) = strict {
        return Ok(names);
    }

    let stripped: Option<Vec<String>> = expected
        .iter()
        .map(|want| {
            available
                .iter()
                .find(|name| name.strip_prefix(WRAPPED_MODULE_PREFIX) == Some(*want))
                .cloned()
        })
        .collect();
    if let Some(names) = stripped {
        log::warn!("{operator}: input names carry a '{WRAPPED_MODULE_PREFIX}' prefix");
        return Ok(names);
    }

    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|want| {
            !available.iter().any(|name| {
                name == want || name.strip_prefix(WRAPPED_MODULE_PREFIX) == Some(*want)
            })
        })
        .collect();
    Err(StyleTtsError::ModelLoad(format!(
        "{operator} is missing inputs {missing:?} (graph has {available:?})"
    )))
}

/// Initialize an ONNX session with optional on-disk graph caching.
fn init_session(
    onnx_path: &Path,
    num_threads: Option<usize>,
    optimized_cache_path: Option<&Path>,
) -> Result<Session, StyleTtsError> {
    let providers = vec![CPUExecutionProvider::default().build()];

    let (load_path, opt_level, write_cache) = match optimized_cache_path {
        Some(cache) if cache.exists() => {
            log::info!("Loading pre-optimized graph from {:?}", cache);
            (cache, GraphOptimizationLevel::Disable, None)
        }
        Some(cache) => {
            log::info!("First load: running Level3 optimization; saving graph to {:?}", cache);
            (onnx_path, GraphOptimizationLevel::Level3, Some(cache))
        }
        None => (onnx_path, GraphOptimizationLevel::Level3, None),
    };

    let mut builder = Session::builder()?
        .with_optimization_level(opt_level)?
        .with_execution_providers(providers)?
        .with_parallel_execution(true)?;

    if let Some(cache) = write_cache {
        builder = builder.with_optimized_model_path(cache)?;
    }

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(load_path)?)
}

/// Drop the leading batch axis and check the result is 2-D.
fn unbatch2(array: ArrayD<f32>) -> Result<Array2<f32>, StyleTtsError> {
    if array.ndim() != 3 || array.shape()[0] != 1 {
        return Err(StyleTtsError::Synthesis(format!(
            "expected a [1, rows, cols] output, got {:?}",
            array.shape()
        )));
    }
    Ok(array.index_axis_move(Axis(0), 0).into_dimensionality::<Ix2>()?)
}

fn flatten(array: ArrayD<f32>) -> Vec<f32> {
    array.into_iter().collect()
}

fn tokens_row(tokens: &[i64]) -> Result<Array2<i64>, StyleTtsError> {
    Ok(Array2::from_shape_vec((1, tokens.len()), tokens.to_vec())?)
}

fn row_view(style: &[f32]) -> Result<ArrayView2<'_, f32>, StyleTtsError> {
    Ok(ArrayView2::from_shape((1, style.len()), style)?)
}

struct OnnxTextEncoder(OnnxOperator);

impl TextEncoder for OnnxTextEncoder {
    fn encode(&self, tokens: &[i64]) -> Result<Array2<f32>, StyleTtsError> {
        let op = &self.0;
        let ids = tokens_row(tokens)?;
        let lengths = ndarray::arr1(&[tokens.len() as i64]);
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(ids.view())?,
                op.input(1) => TensorRef::from_array_view(lengths.view())?,
            ])?;
            f32_outputs!(outputs)?
        };
        unbatch2(op.output(&mut outputs, 0)?)
    }
}

struct OnnxTextEmbedder {
    bert: OnnxOperator,
    projection: OnnxOperator,
}

impl TextEmbedder for OnnxTextEmbedder {
    fn embed(&self, tokens: &[i64]) -> Result<Array2<f32>, StyleTtsError> {
        let op = &self.bert;
        let ids = tokens_row(tokens)?;
        let mask = Array2::<i64>::ones((1, tokens.len()));
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(ids.view())?,
                op.input(1) => TensorRef::from_array_view(mask.view())?,
            ])?;
            f32_outputs!(outputs)?
        };
        unbatch2(op.output(&mut outputs, 0)?)
    }

    fn project(&self, embedding: ArrayView2<f32>) -> Result<Array2<f32>, StyleTtsError> {
        let op = &self.projection;
        let batched = embedding.insert_axis(Axis(0));
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(batched)?,
            ])?;
            f32_outputs!(outputs)?
        };
        // [T, hidden] -> [hidden, T]
        let projected = unbatch2(op.output(&mut outputs, 0)?)?;
        Ok(projected.t().as_standard_layout().into_owned())
    }
}

struct OnnxStyleEncoder {
    acoustic: OnnxOperator,
    prosodic: OnnxOperator,
}

fn encode_mel(op: &OnnxOperator, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError> {
    // [n_mels, frames] -> [1, 1, n_mels, frames]
    let batched = mel.insert_axis(Axis(0)).insert_axis(Axis(0));
    let mut outputs = {
        let mut session = op.session.lock();
        let outputs = session.run(inputs![
            op.input(0) => TensorRef::from_array_view(batched)?,
        ])?;
        f32_outputs!(outputs)?
    };
    Ok(flatten(op.output(&mut outputs, 0)?))
}

impl StyleEncoder for OnnxStyleEncoder {
    fn encode_acoustic(&self, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError> {
        encode_mel(&self.acoustic, mel)
    }

    fn encode_prosodic(&self, mel: ArrayView2<f32>) -> Result<Vec<f32>, StyleTtsError> {
        encode_mel(&self.prosodic, mel)
    }
}

struct OnnxDenoiser(OnnxOperator);

impl StyleDenoiser for OnnxDenoiser {
    fn denoise(
        &self,
        x: &[f32],
        c_noise: f32,
        embedding: ArrayView2<f32>,
        features: &[f32],
        conditioning: Conditioning,
    ) -> Result<Vec<f32>, StyleTtsError> {
        let op = &self.0;
        let x = ndarray::ArrayView3::from_shape((1, 1, x.len()), x)?;
        let sigma = ndarray::arr1(&[c_noise]);
        let embedding = embedding.insert_axis(Axis(0));
        let features = row_view(features)?;
        let unconditional = ndarray::arr1(&[match conditioning {
            Conditioning::Text => 0.0f32,
            Conditioning::Unconditional => 1.0,
        }]);
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(x)?,
                op.input(1) => TensorRef::from_array_view(sigma.view())?,
                op.input(2) => TensorRef::from_array_view(embedding)?,
                op.input(3) => TensorRef::from_array_view(features)?,
                op.input(4) => TensorRef::from_array_view(unconditional.view())?,
            ])?;
            f32_outputs!(outputs)?
        };
        Ok(flatten(op.output(&mut outputs, 0)?))
    }
}

struct OnnxDurationPredictor(OnnxOperator);

impl DurationPredictor for OnnxDurationPredictor {
    fn predict(
        &self,
        encoded: ArrayView2<f32>,
        prosodic_style: &[f32],
    ) -> Result<(Array2<f32>, Array2<f32>), StyleTtsError> {
        let op = &self.0;
        let lengths = ndarray::arr1(&[encoded.ncols() as i64]);
        let batched = encoded.insert_axis(Axis(0));
        let style = row_view(prosodic_style)?;
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(batched)?,
                op.input(1) => TensorRef::from_array_view(style)?,
                op.input(2) => TensorRef::from_array_view(lengths.view())?,
            ])?;
            f32_outputs!(outputs)?
        };
        let features = unbatch2(op.output(&mut outputs, 0)?)?;
        let logits = unbatch2(op.output(&mut outputs, 1)?)?;
        Ok((features, logits))
    }
}

struct OnnxPitchEnergy(OnnxOperator);

impl PitchEnergyPredictor for OnnxPitchEnergy {
    fn predict(
        &self,
        prosody_frames: ArrayView2<f32>,
        prosodic_style: &[f32],
    ) -> Result<(Vec<f32>, Vec<f32>), StyleTtsError> {
        let op = &self.0;
        let batched = prosody_frames.insert_axis(Axis(0));
        let style = row_view(prosodic_style)?;
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(batched)?,
                op.input(1) => TensorRef::from_array_view(style)?,
            ])?;
            f32_outputs!(outputs)?
        };
        let f0 = flatten(op.output(&mut outputs, 0)?);
        let energy = flatten(op.output(&mut outputs, 1)?);
        Ok((f0, energy))
    }
}

struct OnnxVocoder(OnnxOperator);

impl Vocoder for OnnxVocoder {
    fn decode(
        &self,
        text_frames: ArrayView2<f32>,
        f0: &[f32],
        energy: &[f32],
        acoustic_style: &[f32],
    ) -> Result<Vec<f32>, StyleTtsError> {
        let op = &self.0;
        let asr = text_frames.insert_axis(Axis(0));
        let f0 = row_view(f0)?;
        let energy = row_view(energy)?;
        let style = row_view(acoustic_style)?;
        let mut outputs = {
            let mut session = op.session.lock();
            let outputs = session.run(inputs![
                op.input(0) => TensorRef::from_array_view(asr)?,
                op.input(1) => TensorRef::from_array_view(f0)?,
                op.input(2) => TensorRef::from_array_view(energy)?,
                op.input(3) => TensorRef::from_array_view(style)?,
            ])?;
            f32_outputs!(outputs)?
        };
        Ok(flatten(op.output(&mut outputs, 0)?))
    }
}

/// Load every operator graph named by `config`.
fn load_operators(
    model_dir: &Path,
    config: &ModelConfig,
    options: &LoadOptions,
) -> Result<Operators, StyleTtsError> {
    let files = &config.operators;
    let graph = |file: &str| model_dir.join(file);

    Ok(Operators {
        text_encoder: Box::new(OnnxTextEncoder(OnnxOperator::load(
            "text_encoder",
            &graph(&files.text_encoder),
            &["tokens", "input_lengths"],
            options,
        )?)),
        text_embedder: Box::new(OnnxTextEmbedder {
            bert: OnnxOperator::load(
                "bert",
                &config.plbert_dir.join(&files.bert),
                &["input_ids", "attention_mask"],
                options,
            )?,
            projection: OnnxOperator::load(
                "bert_encoder",
                &graph(&files.bert_encoder),
                &["bert_dur"],
                options,
            )?,
        }),
        style_encoder: Box::new(OnnxStyleEncoder {
            acoustic: OnnxOperator::load(
                "style_encoder",
                &graph(&files.style_encoder),
                &["mel"],
                options,
            )?,
            prosodic: OnnxOperator::load(
                "predictor_encoder",
                &graph(&files.predictor_encoder),
                &["mel"],
                options,
            )?,
        }),
        denoiser: Box::new(OnnxDenoiser(OnnxOperator::load(
            "diffusion",
            &graph(&files.diffusion),
            &["x", "sigma", "embedding", "features", "unconditional"],
            options,
        )?)),
        duration_predictor: Box::new(OnnxDurationPredictor(OnnxOperator::load(
            "duration_predictor",
            &graph(&files.duration_predictor),
            &["d_en", "style", "input_lengths"],
            options,
        )?)),
        pitch_energy: Box::new(OnnxPitchEnergy(OnnxOperator::load(
            "pitch_energy",
            &graph(&files.pitch_energy),
            &["en", "style"],
            options,
        )?)),
        vocoder: Box::new(OnnxVocoder(OnnxOperator::load(
            "decoder",
            &graph(&files.decoder),
            &["asr", "f0", "n", "ref"],
            options,
        )?)),
    })
}

impl StyleTts2Model {
    /// Load a model directory: `config.json` plus one ONNX graph per operator.
    ///
    /// Any missing or malformed artifact fails the load; there is no partially
    /// loaded model.
    pub fn load(model_dir: &Path, options: &LoadOptions) -> Result<Self, StyleTtsError> {
        let config_path = model_dir.join("config.json");
        if !config_path.is_file() {
            return Err(StyleTtsError::ModelLoad(format!(
                "config.json not found in {}",
                model_dir.display()
            )));
        }
        let config = ModelConfig::from_file(&config_path)?;

        let vocab = match &config.vocab {
            Some(map) => {
                log::info!("Loading vocab from config.json");
                Vocab::from_map(map)?
            }
            None => Vocab::styletts2(),
        };

        let operators = load_operators(model_dir, &config, options)?;

        let g2p = EspeakBackend::new(options.espeak.clone(), config.language.clone());
        match g2p.self_check() {
            Ok(ipa) => log::info!("espeak-ng ready ({}): hello world -> {ipa}", g2p.language()),
            Err(e) => log::warn!("espeak-ng self-check failed: {e}"),
        }

        let model = Self::from_parts(config, vocab, operators, Box::new(g2p))?;
        log::info!(
            "StyleTTS2 model loaded from {} (style_dim={})",
            model_dir.display(),
            model.style_dim()
        );
        Ok(model)
    }
}
