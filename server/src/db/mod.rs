pub mod backends;
pub mod chunks;
pub mod containers;
pub mod items;
pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

// Re-export commonly used types
pub use models::{
    Backend, BackendKind, BackendStatus, Container, Item, ItemStatus, NewChunk, NewContainer,
    NewItem,
};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run database migrations using SQLx's built-in migration tracking.
/// Migrations are tracked in the `_sqlx_migrations` table and only run once.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fresh in-memory database with the schema applied.
///
/// A single connection that never expires keeps the in-memory database alive
/// for the lifetime of the pool.
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Gateway statistics
pub struct Stats {
    pub total_items: i64,
    pub total_chunks: i64,
    pub total_backends: i64,
    pub total_item_bytes: i64,
}

/// Get gateway statistics
pub async fn get_stats(pool: &DbPool) -> anyhow::Result<Stats> {
    let total_items: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM item")
        .fetch_one(pool)
        .await?;

    let total_chunks: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunk")
        .fetch_one(pool)
        .await?;

    let total_backends: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_server")
        .fetch_one(pool)
        .await?;

    let total_item_bytes: (i64,) =
        sqlx::query_as("SELECT COALESCE(SUM(size), 0) FROM item WHERE status = 'ok'")
            .fetch_one(pool)
            .await?;

    Ok(Stats {
        total_items: total_items.0,
        total_chunks: total_chunks.0,
        total_backends: total_backends.0,
        total_item_bytes: total_item_bytes.0,
    })
}
