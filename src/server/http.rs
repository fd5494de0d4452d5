//! Routes and handlers.

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use super::auth::require_api_key;
use super::state::AppState;
use super::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    pub target_voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub audio_url: String,
    pub s3_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicesResponse {
    pub voices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
struct PresignedQuery {
    expires: u64,
    signature: String,
}

/// Build the application router. `/audio` is authorized by URL signature,
/// every other route by API key.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/generate", post(generate_speech))
        .route("/voices", get(list_voices))
        .route("/health", get(health_check))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .merge(protected)
        .route("/audio/*key", get(download_audio))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn generate_speech(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let max_chars = state.settings.max_text_chars;
    if request.text.chars().count() > max_chars {
        return Err(ApiError::BadRequest(format!(
            "Text length exceeds the maximum limit of {max_chars} characters."
        )));
    }

    let Some(orchestrator) = state.orchestrator.clone() else {
        log::error!("Generate request received before the model was loaded");
        return Err(ApiError::ModelNotLoaded);
    };

    if !state.voices.contains(&request.target_voice) {
        return Err(ApiError::BadRequest(format!(
            "Target voice not supported. Choose from {}.",
            state.voices.list_voices().join(", ")
        )));
    }

    let request_id = Uuid::new_v4();
    log::info!(
        "[{request_id}] Generating speech for {} chars with voice '{}'",
        request.text.chars().count(),
        request.target_voice
    );

    // Cancels the synthesis if this handler is dropped (client went away).
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let voices = state.voices.clone();
    let params = state.synthesis.clone();
    let GenerateRequest { text, target_voice } = request;
    let result = tokio::task::spawn_blocking(move || {
        let style = voices.style_for(&target_voice, |path| orchestrator.extract_style(path))?;
        orchestrator.synthesize_with_style(&text, &style, &params, &cancel)
    })
    .await
    .map_err(|e| {
        log::error!("[{request_id}] Synthesis task failed: {e}");
        ApiError::Internal("Failed to generate speech")
    })?
    .map_err(|e| {
        log::error!("[{request_id}] Failed to generate speech: {e}");
        ApiError::from(e)
    })?;

    let wav = result.to_wav_bytes().map_err(|e| {
        log::error!("[{request_id}] WAV encoding failed: {e}");
        ApiError::Internal("Failed to generate speech")
    })?;

    let key = format!("{}/{request_id}.wav", state.settings.key_prefix);
    state.store.put(&key, wav).await?;
    let audio_url = state.store.presign_get(&key, state.settings.presign_ttl)?;
    log::info!(
        "[{request_id}] Uploaded {:.2}s of audio to {key}",
        result.duration_secs()
    );

    Ok(Json(GenerateResponse {
        audio_url,
        s3_key: key,
    }))
}

async fn list_voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        voices: state
            .voices
            .list_voices()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, model) = if state.model_loaded() {
        ("healthy", "loaded")
    } else {
        ("unhealthy", "not loaded")
    };
    Json(HealthResponse {
        status: status.to_string(),
        model: model.to_string(),
    })
}

async fn download_audio(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<PresignedQuery>,
) -> Result<Response, ApiError> {
    if !state
        .store
        .verify_presigned(&key, query.expires, &query.signature)
    {
        return Err(ApiError::Forbidden);
    }
    let bytes = state.store.get(&key).await?;
    Ok(([(CONTENT_TYPE, "audio/wav")], bytes).into_response())
}
