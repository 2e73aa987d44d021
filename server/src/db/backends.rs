//! Database operations for registered backends (`file_server` table)
//!
//! Selection and capacity accounting run directly against the table so that
//! concurrent uploads always observe the latest used space.

use super::models::{now_millis, Backend, BackendRow, BackendStatus};
use super::DbPool;
use crate::error::{Result, StoreError};
use crate::storage::transport::ConnectionParams;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

const BACKEND_COLUMNS: &str =
    "id, name, type, params, total_space, used_space, status, created, modified";

/// First delay between contended capacity updates; doubles per attempt.
const CONTENTION_BACKOFF: Duration = Duration::from_millis(10);

/// Register a backend with `unknown` status
pub async fn create_backend(
    pool: &DbPool,
    name: &str,
    params: &ConnectionParams,
    total_space: i64,
) -> Result<Backend> {
    let id = Uuid::now_v7().to_string();
    let now = now_millis();

    let row = sqlx::query_as::<_, BackendRow>(&format!(
        r#"
        INSERT INTO file_server (id, name, type, params, total_space, used_space, status, created, modified)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
        RETURNING {}
        "#,
        BACKEND_COLUMNS
    ))
    .bind(&id)
    .bind(name)
    .bind(params.kind().as_str())
    .bind(params.encode()?)
    .bind(total_space)
    .bind(BackendStatus::Unknown)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Backend::try_from(row)
}

/// Get a backend by ID
pub async fn get_backend(pool: &DbPool, id: &str) -> Result<Option<Backend>> {
    let row = sqlx::query_as::<_, BackendRow>(&format!(
        "SELECT {} FROM file_server WHERE id = ?",
        BACKEND_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Backend::try_from).transpose()
}

/// List every registered backend
pub async fn list_backends(pool: &DbPool) -> Result<Vec<Backend>> {
    let rows = sqlx::query_as::<_, BackendRow>(&format!(
        "SELECT {} FROM file_server ORDER BY created, id",
        BACKEND_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Backend::try_from).collect()
}

/// Pick the healthy backend with the most free space whose ID is not excluded.
/// Ties are broken by ascending ID.
pub async fn choose_excluding(pool: &DbPool, exclude: &HashSet<String>) -> Result<Backend> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM file_server WHERE status = ",
        BACKEND_COLUMNS
    ));
    query.push_bind(BackendStatus::Ok);

    if !exclude.is_empty() {
        query.push(" AND id NOT IN (");
        let mut ids = query.separated(", ");
        for id in exclude {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
    }

    query.push(" ORDER BY total_space - used_space DESC, id ASC LIMIT 1");

    let row = query
        .build_query_as::<BackendRow>()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("eligible file server".into()))?;

    Backend::try_from(row)
}

/// Number of backends whose probe succeeded
pub async fn count_healthy(pool: &DbPool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_server WHERE status = ?")
        .bind(BackendStatus::Ok)
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

/// Add `delta` bytes to a backend's used space.
///
/// The increment happens inside a single UPDATE so concurrent callers never
/// lose each other's changes. Lock contention is retried with exponential
/// backoff up to `max_attempts` times.
pub async fn update_used_space(
    pool: &DbPool,
    id: &str,
    delta: i64,
    max_attempts: u32,
) -> Result<()> {
    let mut backoff = CONTENTION_BACKOFF;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = sqlx::query(
            r#"
            UPDATE file_server
            SET used_space = used_space + ?, modified = ?
            WHERE id = ?
            "#,
        )
        .bind(delta)
        .bind(now_millis())
        .bind(id)
        .execute(pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                return Err(StoreError::NotFound(format!("file server {}", id)));
            }
            Ok(_) => return Ok(()),
            Err(e) if is_contention(&e) => {
                if attempt >= max_attempts {
                    return Err(StoreError::Contention(format!("file server {}", id), attempt));
                }
                tracing::debug!(backend_id = %id, attempt, "used space update contended: {}", e);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Record the outcome of a connectivity probe
pub async fn update_status(pool: &DbPool, id: &str, status: BackendStatus) -> Result<()> {
    let result = sqlx::query("UPDATE file_server SET status = ?, modified = ? WHERE id = ?")
        .bind(status)
        .bind(now_millis())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("file server {}", id)));
    }
    Ok(())
}

/// SQLITE_BUSY / SQLITE_LOCKED and their extended codes
fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5) | Some(6))
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
