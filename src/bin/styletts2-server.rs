use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use styletts_rs::engines::styletts2::{
    LoadOptions, StyleTts2Model, SynthesisOrchestrator, VoiceStore,
};
use styletts_rs::server::{
    create_router, AppState, LocalObjectStore, ObjectStore, ServerConfig, UrlSigner,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();
    config.validate().map_err(|e| anyhow!(e))?;

    log::info!("Starting StyleTTS2 server v{}", env!("CARGO_PKG_VERSION"));

    let voices = match &config.voices_file {
        Some(path) => VoiceStore::from_json_file(path)
            .with_context(|| format!("loading voices from {}", path.display()))?,
        None => VoiceStore::default_catalogue(&config.reference_dir),
    };
    log::info!("Voices: {}", voices.list_voices().join(", "));

    let orchestrator = load_model(&config, &voices).await?;

    let signer = UrlSigner::new(config.signing_secret(), config.public_base_url.clone());
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.storage_dir, signer));

    let state = AppState::new(
        config.service_settings(),
        Some(orchestrator),
        Arc::new(voices),
        store,
    );
    let app = create_router(state);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped, releasing model");
    Ok(())
}

/// Load the model off the async runtime. Any failure aborts startup.
async fn load_model(config: &ServerConfig, voices: &VoiceStore) -> Result<SynthesisOrchestrator> {
    let model_dir = config.model_dir.clone();
    let options = LoadOptions {
        num_threads: config.num_threads,
        optimized_cache_dir: config.optimized_model_cache_dir.clone(),
        ..Default::default()
    };

    log::info!("Loading model from {}", model_dir.display());
    let model = tokio::task::spawn_blocking(move || StyleTts2Model::load(&model_dir, &options))
        .await
        .context("model loading task panicked")?
        .context("failed to load model")?;

    if let Some(archive) = &config.style_archive {
        match voices.preload_npz(archive, model.style_dim()) {
            Ok(count) => log::info!("Preloaded {count} voice styles from {}", archive.display()),
            Err(e) => log::warn!("Ignoring style archive {}: {e}", archive.display()),
        }
    }

    log::info!("Model loaded");
    Ok(SynthesisOrchestrator::new(Arc::new(model)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => log::error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, shutting down"),
        _ = terminate => log::info!("Received SIGTERM, shutting down"),
    }
}
