//! Database operations for items

use super::models::{now_millis, Item, ItemStatus, NewItem};
use super::DbPool;
use crate::error::Result;
use uuid::Uuid;

/// Insert a new item in `pending` state
pub async fn create_item(pool: &DbPool, new_item: &NewItem) -> Result<Item> {
    let id = Uuid::now_v7().to_string();
    let now = now_millis();

    sqlx::query(
        r#"
        INSERT INTO item (id, name, container_id, size, chunk_count, status, created, modified)
        VALUES (?, ?, ?, ?, 0, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new_item.name)
    .bind(&new_item.container_id)
    .bind(new_item.size)
    .bind(ItemStatus::Pending)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let item = get_item(pool, &id)
        .await?
        .ok_or_else(|| crate::error::StoreError::NotFound(format!("item {}", id)))?;
    Ok(item)
}

/// Get an item by ID
pub async fn get_item(pool: &DbPool, id: &str) -> Result<Option<Item>> {
    let item = sqlx::query_as::<_, Item>(
        r#"
        SELECT id, name, container_id, size, chunk_count, status, created, modified
        FROM item
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

/// List the items of a container, oldest first
pub async fn list_items(pool: &DbPool, container_id: &str) -> Result<Vec<Item>> {
    let items = sqlx::query_as::<_, Item>(
        r#"
        SELECT id, name, container_id, size, chunk_count, status, created, modified
        FROM item
        WHERE container_id = ?
        ORDER BY created, id
        "#,
    )
    .bind(container_id)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

/// Set the lifecycle status, and the chunk count when given
pub async fn update_status(
    pool: &DbPool,
    id: &str,
    status: ItemStatus,
    chunk_count: Option<i64>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE item
        SET status = ?, chunk_count = COALESCE(?, chunk_count), modified = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(chunk_count)
    .bind(now_millis())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(crate::error::StoreError::NotFound(format!("item {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_item_lifecycle() {
        let pool = test_pool().await;
        let item = create_item(
            &pool,
            &NewItem {
                name: "report.pdf".into(),
                container_id: "123".into(),
                size: 4096,
            },
        )
        .await
        .unwrap();

        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.chunk_count, 0);

        update_status(&pool, &item.id, ItemStatus::Ok, Some(3)).await.unwrap();
        let stored = get_item(&pool, &item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Ok);
        assert_eq!(stored.chunk_count, 3);

        // Failing an item keeps its chunk count
        update_status(&pool, &item.id, ItemStatus::Fail, None).await.unwrap();
        let stored = get_item(&pool, &item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Fail);
        assert_eq!(stored.chunk_count, 3);

        let listed = list_items(&pool, "123").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_item() {
        let pool = test_pool().await;
        assert!(get_item(&pool, "nope").await.unwrap().is_none());
        assert!(update_status(&pool, "nope", ItemStatus::Fail, None).await.is_err());
    }
}
