//! Caption log endpoints.
//!
//! Provides HTTP endpoints for:
//! - Reading recent captions (GET /captions)
//! - Publishing a caption as the logged-in user (POST /captions)

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::model::Caption;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Query parameters for the caption listing.
#[derive(Debug, Deserialize, Default)]
pub struct CaptionQueryParams {
    /// Maximum results, oldest first (default 20)
    pub limit: Option<usize>,
}

/// Request body for publishing a caption.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Create the captions router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(list_captions).post(publish_caption))
        .with_state(state)
}

/// GET /captions - Recent captions, oldest first.
async fn list_captions(
    State(state): State<ApiState>,
    Query(params): Query<CaptionQueryParams>,
) -> Json<Vec<Caption>> {
    Json(state.captions.recent(params.limit.unwrap_or(20)))
}

/// POST /captions - Publish a caption authored by the logged-in user.
async fn publish_caption(
    State(state): State<ApiState>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<Json<Value>> {
    let author = {
        let session = state.session.lock().await;
        session
            .current_user()
            .cloned()
            .ok_or_else(|| ApiError::forbidden("not logged in"))?
    };

    let language = req.language.as_deref().unwrap_or("en");
    state.captions.append(&author, &req.text, language).await?;

    Ok(Json(json!({ "success": true })))
}
