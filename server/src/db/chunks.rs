//! Database operations for placed chunks
//!
//! A chunk row is written once per successful placement and never updated.

use super::models::{now_millis, Chunk, NewChunk};
use super::DbPool;
use crate::error::Result;
use uuid::Uuid;

/// Record a placed chunk
pub async fn create_chunk(pool: &DbPool, new_chunk: &NewChunk) -> Result<Chunk> {
    let id = Uuid::now_v7().to_string();
    let now = now_millis();

    let chunk = sqlx::query_as::<_, Chunk>(
        r#"
        INSERT INTO chunk (id, item_id, position, file_server_id, file_path, size, created, modified)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, item_id, position, file_server_id, file_path, size, created, modified
        "#,
    )
    .bind(&id)
    .bind(&new_chunk.item_id)
    .bind(new_chunk.position)
    .bind(&new_chunk.file_server_id)
    .bind(&new_chunk.file_path)
    .bind(new_chunk.size)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(chunk)
}

/// Get all chunks of an item, ordered by position
pub async fn list_item_chunks(pool: &DbPool, item_id: &str) -> Result<Vec<Chunk>> {
    let chunks = sqlx::query_as::<_, Chunk>(
        r#"
        SELECT id, item_id, position, file_server_id, file_path, size, created, modified
        FROM chunk
        WHERE item_id = ?
        ORDER BY position
        "#,
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{backends, items, test_pool, NewItem};
    use crate::storage::transport::{ConnectionParams, LocalParams};

    #[tokio::test]
    async fn test_chunks_listed_by_position() {
        let pool = test_pool().await;
        let item = items::create_item(
            &pool,
            &NewItem {
                name: "a.bin".into(),
                container_id: String::new(),
                size: 30,
            },
        )
        .await
        .unwrap();
        let backend = backends::create_backend(
            &pool,
            "disk",
            &ConnectionParams::Local(LocalParams {
                base_path: "/tmp/stow".into(),
            }),
            1000,
        )
        .await
        .unwrap();

        // Arrival order differs from position order
        for position in [2, 0, 1] {
            create_chunk(
                &pool,
                &NewChunk {
                    item_id: item.id.clone(),
                    position,
                    file_server_id: backend.id.clone(),
                    file_path: format!("p{}", position),
                    size: 10,
                },
            )
            .await
            .unwrap();
        }

        let chunks = list_item_chunks(&pool, &item.id).await.unwrap();
        let positions: Vec<i64> = chunks.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);

        assert_eq!(chunks[0].file_path, "p0");
    }

    #[tokio::test]
    async fn test_duplicate_position_rejected() {
        let pool = test_pool().await;
        let item = items::create_item(
            &pool,
            &NewItem {
                name: "a.bin".into(),
                container_id: String::new(),
                size: 10,
            },
        )
        .await
        .unwrap();
        let backend = backends::create_backend(
            &pool,
            "disk",
            &ConnectionParams::Local(LocalParams {
                base_path: "/tmp/stow".into(),
            }),
            1000,
        )
        .await
        .unwrap();

        let new_chunk = NewChunk {
            item_id: item.id.clone(),
            position: 0,
            file_server_id: backend.id.clone(),
            file_path: "p0".into(),
            size: 10,
        };
        create_chunk(&pool, &new_chunk).await.unwrap();
        assert!(create_chunk(&pool, &new_chunk).await.is_err());
    }
}
