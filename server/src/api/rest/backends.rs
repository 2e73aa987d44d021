//! File server (backend) routes
//!
//! Credentials are never returned: every response goes through
//! `Backend::hide_credentials`.

use crate::api::AppState;
use crate::db::{Backend, BackendKind};
use crate::storage::Registration;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use super::error::AppError;

// ============================================================================
// ROUTES
// ============================================================================

pub fn backend_routes() -> Router<AppState> {
    Router::new()
        .route("/file_server", get(list_backends))
        .route("/file_server/add/:kind", post(add_backend))
        .route("/file_server/:id", get(get_backend))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Register a backend; its health is probed in the background
/// POST /file_server/add/:kind (ssh | api | local)
async fn add_backend(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Backend>, AppError> {
    let kind: BackendKind = kind.parse()?;
    let registration = Registration::parse(kind, body).await?;
    let backend = state.registry.register(registration).await?;
    Ok(Json(backend.hide_credentials()))
}

/// GET /file_server/:id
async fn get_backend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Backend>, AppError> {
    let backend = state.registry.get(&id).await?;
    Ok(Json(backend.hide_credentials()))
}

/// GET /file_server
async fn list_backends(State(state): State<AppState>) -> Result<Json<Vec<Backend>>, AppError> {
    let backends = state.registry.list().await?;
    Ok(Json(backends.iter().map(Backend::hide_credentials).collect()))
}
