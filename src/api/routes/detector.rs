//! Speaking detector endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use axum::{
    extract::State,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Request body for retuning the detector.
#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: f32,
}

/// Create the detector router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(detector_status))
        .route("/threshold", put(set_threshold))
        .with_state(state)
}

/// GET /detector - Current detector state.
async fn detector_status(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "running": state.detector.is_running(),
        "threshold": state.detector.threshold(),
    }))
}

/// PUT /detector/threshold - Retune the energy threshold at runtime.
async fn set_threshold(
    State(state): State<ApiState>,
    Json(req): Json<ThresholdRequest>,
) -> ApiResult<Json<Value>> {
    if !req.threshold.is_finite() || req.threshold < 0.0 {
        return Err(ApiError::bad_request(
            "threshold must be a non-negative number",
        ));
    }

    state.detector.set_threshold(req.threshold);
    info!("Detector threshold set to {} via API", req.threshold);

    Ok(Json(json!({
        "success": true,
        "threshold": state.detector.threshold(),
    })))
}
