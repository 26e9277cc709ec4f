//! Meeting room endpoints.
//!
//! Provides HTTP endpoints for:
//! - Listing participants with the current tile layout (GET /room)
//! - Reading the grid layout alone (GET /room/grid)

use crate::api::ApiState;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

/// Create the room router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(room_view))
        .route("/grid", get(grid))
        .with_state(state)
}

/// GET /room - Participants and the tile layout that fits them.
async fn room_view(State(state): State<ApiState>) -> Json<Value> {
    let participants = state.room.participants();
    let layout = state.room.grid();

    Json(json!({
        "meeting_id": state.room.meeting_id(),
        "count": participants.len(),
        "grid": layout,
        "participants": participants,
    }))
}

/// GET /room/grid - Just the layout for the current participant count.
async fn grid(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "count": state.room.participant_count(),
        "grid": state.room.grid(),
    }))
}
