use std::path::PathBuf;
use std::time::Instant;

use styletts_rs::{
    engines::styletts2::{
        StyleTts2Engine, StyleTts2InferenceParams, StyleTts2ModelParams, SynthesisParams,
    },
    SynthesisEngine,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut engine = StyleTts2Engine::new();
    let model_path = PathBuf::from("models/styletts2");

    let load_start = Instant::now();
    engine.load_model_with_params(&model_path, StyleTts2ModelParams::default())?;
    println!("Model loaded in {:.2?}", load_start.elapsed());

    println!("Available voices: {:?}", engine.list_voices());

    let text = "StyleTTS two samples a speaking style for every sentence. \
                Long passages are split into segments, synthesized one by one, \
                and joined back together with short pauses.";

    let params = StyleTts2InferenceParams {
        voice: "amused".to_string(),
        synthesis: Some(SynthesisParams {
            diffusion_steps: 10,
            seed: Some(42),
            ..engine.default_synthesis_params()
        }),
        ..Default::default()
    };

    let synth_start = Instant::now();
    let result = engine.synthesize(text, Some(params))?;
    let synth_dur = synth_start.elapsed();

    let audio_duration = result.duration_secs();
    let speedup = audio_duration / synth_dur.as_secs_f64();
    println!(
        "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
        audio_duration, synth_dur, speedup
    );

    engine.synthesize_to_file(text, &PathBuf::from("output.wav"), None)?;
    println!("Saved to output.wav");

    engine.unload_model();
    Ok(())
}
