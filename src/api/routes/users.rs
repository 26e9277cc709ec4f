//! User directory endpoints.
//!
//! Admin actions run as the logged-in user; the directory refuses them
//! for non-admins before anything reaches the remote table.

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::model::User;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for uploading the logged-in user's profile photo.
#[derive(Debug, Deserialize)]
pub struct PhotoRequest {
    /// Base64-encoded image bytes
    pub content: String,
    pub content_type: String,
}

/// Create the users router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/pending", get(pending_users))
        .route("/photo", post(upload_photo))
        .route("/{id}/approve", post(approve_user))
        .route("/{id}/reject", post(reject_user))
        .route("/{id}/promote", post(promote_user))
        .with_state(state)
}

async fn actor(state: &ApiState) -> ApiResult<User> {
    let session = state.session.lock().await;
    session
        .current_user()
        .cloned()
        .ok_or_else(|| ApiError::forbidden("not logged in"))
}

/// GET /users - Every registered user.
async fn list_users(State(state): State<ApiState>) -> Json<Vec<User>> {
    Json(state.directory.all_users())
}

/// GET /users/pending - Users still waiting for admission.
async fn pending_users(State(state): State<ApiState>) -> Json<Vec<User>> {
    Json(state.directory.pending_users())
}

/// POST /users/photo - Upload a profile photo for the logged-in user.
async fn upload_photo(
    State(state): State<ApiState>,
    Json(req): Json<PhotoRequest>,
) -> ApiResult<Json<Value>> {
    let actor = actor(&state).await?;
    let bytes = BASE64
        .decode(&req.content)
        .map_err(|e| ApiError::bad_request(format!("invalid base64 content: {e}")))?;

    let url = state
        .directory
        .upload_photo(&actor, &bytes, &req.content_type)
        .await?;
    Ok(Json(json!({ "success": true, "photo_url": url })))
}

/// POST /users/:id/approve - Admit a pending user.
async fn approve_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let actor = actor(&state).await?;
    state.directory.approve(&actor, &id).await?;
    Ok(Json(json!({ "success": true, "user_id": id })))
}

/// POST /users/:id/reject - Remove a pending user's record.
async fn reject_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let actor = actor(&state).await?;
    state.directory.reject(&actor, &id).await?;
    Ok(Json(json!({ "success": true, "user_id": id })))
}

/// POST /users/:id/promote - Grant a user the admin role.
async fn promote_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let actor = actor(&state).await?;
    state.directory.promote(&actor, &id).await?;
    Ok(Json(json!({ "success": true, "user_id": id })))
}
