//! REST API server for Huddle.
//!
//! Provides HTTP endpoints for:
//! - Service status (session state, detector, participant count)
//! - Room view and tile layout
//! - Caption log reads and publishes
//! - User directory admin actions
//! - Detector tuning

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tracing::info;

use crate::captions::CaptionLog;
use crate::detector::DetectorHandle;
use crate::directory::UserDirectory;
use crate::room::MeetingRoom;
use crate::session::SessionGate;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<Mutex<SessionGate>>,
    pub directory: Arc<UserDirectory>,
    pub room: Arc<MeetingRoom>,
    pub captions: Arc<CaptionLog>,
    pub detector: DetectorHandle,
}

pub struct ApiServer {
    port: u16,
    state: ApiState,
}

impl ApiServer {
    pub fn new(port: u16, state: ApiState) -> Self {
        Self { port, state }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            // Root and version endpoints
            .route("/", get(service_info))
            .route("/version", get(version))
            .route(
                "/status",
                get(status).with_state(self.state.clone()),
            )
            // Feature routes
            .nest("/room", routes::room::router(self.state.clone()))
            .nest("/captions", routes::captions::router(self.state.clone()))
            .nest("/users", routes::users::router(self.state.clone()))
            .nest("/detector", routes::detector::router(self.state))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                   - Service info");
        info!("  GET  /version            - Version info");
        info!("  GET  /status             - Session and detector status");
        info!("  GET  /room               - Participants and grid layout");
        info!("  GET  /room/grid          - Grid layout only");
        info!("  GET  /captions           - Recent captions");
        info!("  POST /captions           - Publish a caption");
        info!("  GET  /users              - List users");
        info!("  GET  /users/pending      - List pending users");
        info!("  POST /users/:id/approve  - Approve a pending user");
        info!("  POST /users/:id/reject   - Reject a pending user");
        info!("  POST /users/:id/promote  - Promote a user to admin");
        info!("  GET  /detector           - Detector status");
        info!("  PUT  /detector/threshold - Retune the detector");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "huddle",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "huddle"
    }))
}

/// GET /status - One-line view of the whole service.
async fn status(State(state): State<ApiState>) -> Json<Value> {
    let (session_state, user_id) = {
        let session = state.session.lock().await;
        (
            session.state(),
            session.current_user().map(|u| u.id.clone()),
        )
    };

    Json(json!({
        "session": session_state.as_str(),
        "user_id": user_id,
        "joined": state.room.is_joined(),
        "participants": state.room.participant_count(),
        "detector_running": state.detector.is_running(),
        "threshold": state.detector.threshold(),
    }))
}
