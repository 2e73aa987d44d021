//! Container routes

use crate::api::AppState;
use crate::db::{self, Container, Item, ItemStatus, NewContainer};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};

use super::error::AppError;
use super::types::ListItemsQuery;

pub fn container_routes() -> Router<AppState> {
    Router::new()
        .route("/container", get(list_containers))
        .route("/container/create", post(create_container))
        .route("/container/:id", get(get_container))
        .route("/container/:id/items", get(list_container_items))
}

/// POST /container/create
async fn create_container(
    State(state): State<AppState>,
    Json(req): Json<NewContainer>,
) -> Result<Json<Container>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Container name cannot be empty".into()));
    }
    let container = db::containers::create_container(&state.db, &req).await?;
    tracing::info!(container_id = %container.id, "container created");
    Ok(Json(container))
}

/// GET /container/:id
async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Container>, AppError> {
    let container = db::containers::get_container(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("container {} not found", id)))?;
    Ok(Json(container))
}

/// GET /container
async fn list_containers(State(state): State<AppState>) -> Result<Json<Vec<Container>>, AppError> {
    Ok(Json(db::containers::list_containers(&state.db).await?))
}

/// Items stored under a container, optionally filtered by status
/// GET /container/:id/items?status=ok
async fn list_container_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<Vec<Item>>, AppError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some("pending") => Some(ItemStatus::Pending),
        Some("ok") => Some(ItemStatus::Ok),
        Some("fail") => Some(ItemStatus::Fail),
        Some(other) => {
            return Err(AppError::BadRequest(format!("Unknown item status '{}'", other)))
        }
    };

    let items = db::items::list_items(&state.db, &id).await?;
    let items = items
        .into_iter()
        .filter(|item| status.map_or(true, |s| item.status == s))
        .collect();
    Ok(Json(items))
}
