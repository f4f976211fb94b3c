use crate::config::Config;
use crate::error::ApiError;
use crate::overlay::OverlayRenderer;
use crate::session::SessionResources;
use crate::source::{SourceOpener, SystemSourceOpener};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::plates::PlateReport;
use plate_engine::PlateEngine;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub resources: SessionResources,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Arc<PlateEngine>, opener: Arc<dyn SourceOpener>, config: Config) -> Self {
        let overlay = OverlayRenderer::from_font_path(config.session.overlay_font_path.as_deref());
        Self {
            resources: SessionResources {
                engine,
                opener,
                overlay: Arc::new(overlay),
                settings: config.session.clone(),
            },
            config: Arc::new(config),
        }
    }

    /// State backed by real webcams and MJPEG endpoints
    pub fn with_system_sources(engine: Arc<PlateEngine>, config: Config) -> Self {
        Self::new(engine, Arc::new(SystemSourceOpener), config)
    }

    pub fn engine(&self) -> &PlateEngine {
        &self.resources.engine
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/plates/detect", post(detect_plates))
        .route("/ws/video-stream", get(crate::ws::ws_handler))
        .with_state(state)
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine();
    let healthy = engine.is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "detector": engine.detector_id(),
            "recognizer": engine.recognizer_id(),
        })),
    )
}

pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub message: String,
    pub plates: Vec<PlateReport>,
}

/// Thorough analysis of an uploaded image (raw JPEG or PNG body)
pub async fn detect_plates(State(state): State<AppState>, body: Bytes) -> Result<Json<DetectResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("empty image body"));
    }

    let image = image::load_from_memory(&body)
        .map_err(|e| ApiError::bad_request(format!("unsupported image: {}", e)))?
        .to_rgb8();

    let engine = state.resources.engine.clone();
    let plates = tokio::task::spawn_blocking(move || engine.analyze_image(&image))
        .await
        .map_err(|e| ApiError::internal(format!("analysis task failed: {}", e)))??;

    info!(plates = plates.len(), "analyzed uploaded image");

    let message = if plates.is_empty() {
        "no plates detected".to_string()
    } else {
        format!("{} plate(s) detected", plates.len())
    };
    Ok(Json(DetectResponse { message, plates }))
}
