//! Item routes
//!
//! Uploads are spooled to disk and handed to the placement service; the
//! response carries the `pending` item while placement runs in the background.

use crate::api::AppState;
use crate::db::{self, Item};
use crate::storage::{download, ItemSource};
use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use super::error::AppError;
use super::types::{ByteRange, CancelResponse};

// ============================================================================
// ROUTES
// ============================================================================

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/item/store", post(store_item))
        .route("/item/:id", get(get_item))
        .route("/item/:id/download", get(download_item))
        .route("/item/:id/cancel", post(cancel_item))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Store a new item
/// POST /item/store (multipart: `item` file, `container_id` text)
async fn store_item(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Item>, AppError> {
    tokio::fs::create_dir_all(&state.config.spool_path).await?;

    let mut spooled: Option<(String, NamedTempFile)> = None;
    let mut container_id = String::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "item" => {
                let name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("item")
                    .to_string();

                let tmp = NamedTempFile::new_in(&state.config.spool_path)?;
                let mut out = tokio::fs::File::from_std(tmp.reopen()?);
                let mut written = 0u64;
                while let Some(bytes) = field
                    .chunk()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Upload interrupted: {}", e)))?
                {
                    out.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                out.flush().await?;

                tracing::debug!(name = %name, bytes = written, "upload spooled");
                spooled = Some((name, tmp));
            }
            "container_id" => {
                container_id = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Malformed container_id: {}", e)))?;
            }
            _ => {}
        }
    }

    let (name, file) =
        spooled.ok_or_else(|| AppError::BadRequest("Missing form field 'item'".into()))?;

    let item = state
        .placement
        .store_item(&name, container_id.trim(), ItemSource::new(file))
        .await?;

    Ok(Json(item))
}

/// Get item metadata
/// GET /item/:id
async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Item>, AppError> {
    let item = db::items::get_item(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("item {} not found", id)))?;
    Ok(Json(item))
}

/// Stream an item's content reassembled from its chunks
/// GET /item/:id/download
///
/// Honors a single `Range` header with a 206 response.
async fn download_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (item, reader) = download::open_item(&state.db, &state.registry, &id).await?;
    let size = item.size.max(0) as u64;

    let requested = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|h| ByteRange::parse(h, size))
        .transpose();
    let range = match requested {
        Ok(range) => range.flatten(),
        Err(_) => {
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
            )
                .into_response())
        }
    };

    let (offset, len) = match range {
        Some(r) => (r.start, r.len()),
        None => (0, size),
    };

    tracing::debug!(item_id = %item.id, offset, len, "streaming download");

    let mut rx = download::spawn_pump(reader, offset, len);
    let stream = async_stream::stream! {
        while let Some(block) = rx.recv().await {
            yield block.map(Bytes::from);
        }
    };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", safe_filename(&item.name)),
        );
    builder = match range {
        Some(r) => builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", r.start, r.end, size),
        ),
        None => builder.status(StatusCode::OK),
    };

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Cancel an in-progress upload
/// POST /item/:id/cancel
async fn cancel_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let item = db::items::get_item(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("item {} not found", id)))?;

    let cancelled = state.placement.cancel(&item.id).await;
    if cancelled {
        tracing::info!(item_id = %item.id, "upload cancellation requested");
    }

    Ok(Json(CancelResponse {
        id: item.id,
        cancelled,
    }))
}

/// Strip characters that would break the `Content-Disposition` header.
fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("report.pdf"), "report.pdf");
        assert_eq!(safe_filename("a\"b\r\n.txt"), "ab.txt");
        assert_eq!(safe_filename("\"\""), "download");
    }
}
