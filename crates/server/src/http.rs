//! HTTP surface: the `/answer` SSE endpoint and the `/audio/trim` auxiliary
//! endpoint, plus a liveness check.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use answer_pipeline_core::event::EventBus;
use answer_pipeline_core::request::RequestContext;
use answer_pipeline_pipeline::audio::{pcm_to_wav, trim_silence_with_threshold, wav_to_pcm};
use answer_pipeline_pipeline::Orchestrator;

use crate::state::AppState;
use crate::ServerError;

/// Builds the application router, wiring CORS/compression/tracing layers
/// from `state.settings.server`.
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        .route("/answer", post(answer))
        .route("/audio/trim", post(trim_audio))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled, allowing all origins");
        return CorsLayer::permissive();
    }
    if origins.is_empty() {
        tracing::info!("no CORS origins configured, allowing none");
        return CorsLayer::new();
    }
    let parsed: Vec<_> = origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse::<axum::http::HeaderValue>()
                .map_err(|_| tracing::warn!(origin, "invalid CORS origin, skipping"))
                .ok()
        })
        .collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// `POST /answer`: runs one request through the orchestrator and streams its
/// event bus back to the client as SSE, per the documented event contract.
async fn answer(
    State(state): State<AppState>,
    Json(request): Json<RequestContext>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let bus = EventBus::new(state.settings.orchestrator.channel_capacity);
    let mut receiver = bus.stream();
    let deps = Arc::clone(&state.dependencies);

    tokio::spawn(Orchestrator::run(request, bus, deps));

    let sse_stream = async_stream::stream! {
        while let Some(event) = futures::StreamExt::next(&mut receiver).await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(SseEvent::default().data(json)),
                Err(err) => tracing::error!(error = %err, "failed to serialize SSE event"),
            }
        }
    };

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct TrimRequest {
    audio_url: String,
    silence_threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
struct TrimResponse {
    status: &'static str,
    original_size_bytes: usize,
    trimmed_size_bytes: usize,
    size_reduction_bytes: usize,
    size_reduction_percent: f64,
    trimmed_audio_base64: String,
    audio_format: &'static str,
}

/// `POST /audio/trim`: downloads the audio at `audio_url`, trims leading and
/// trailing silence, and returns the trimmed WAV plus size-reduction stats.
async fn trim_audio(
    State(_state): State<AppState>,
    Json(request): Json<TrimRequest>,
) -> Result<Json<TrimResponse>, ServerError> {
    let response = reqwest::get(&request.audio_url)
        .await
        .map_err(|err| ServerError::InvalidRequest(format!("failed to fetch audio_url: {err}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ServerError::Internal(format!("failed to read audio body: {err}")))?;

    if bytes.is_empty() {
        return Err(ServerError::InvalidRequest("audio is empty".to_string()));
    }

    let pcm = wav_to_pcm(&bytes)
        .or_else(|| (bytes.len() % 2 == 0).then(|| bytes.to_vec()))
        .ok_or_else(|| ServerError::InvalidRequest("unrecognized audio format".to_string()))?;

    let threshold = request.silence_threshold.unwrap_or(0.05);
    let trimmed_pcm = trim_silence_with_threshold(&pcm, threshold);
    let trimmed_wav = pcm_to_wav(&trimmed_pcm);

    let original_size_bytes = bytes.len();
    let trimmed_size_bytes = trimmed_wav.len();
    let size_reduction_bytes = original_size_bytes.saturating_sub(trimmed_size_bytes);
    let size_reduction_percent = if original_size_bytes == 0 {
        0.0
    } else {
        (size_reduction_bytes as f64 / original_size_bytes as f64) * 100.0
    };

    Ok(Json(TrimResponse {
        status: "ok",
        original_size_bytes,
        trimmed_size_bytes,
        size_reduction_bytes,
        size_reduction_percent,
        trimmed_audio_base64: base64::engine::general_purpose::STANDARD.encode(&trimmed_wav),
        audio_format: "wav",
    }))
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
