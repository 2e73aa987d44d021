//! Database operations for item containers
//!
//! Containers are plain folder-like metadata; items reference them by ID
//! without a foreign key.

use super::models::{now_millis, Container, NewContainer};
use super::DbPool;
use crate::error::Result;
use uuid::Uuid;

/// Create a new container
pub async fn create_container(pool: &DbPool, new_container: &NewContainer) -> Result<Container> {
    let id = Uuid::now_v7().to_string();
    let now = now_millis();

    let container = sqlx::query_as::<_, Container>(
        r#"
        INSERT INTO container (id, name, description, parent_id, created, modified)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, name, description, parent_id, created, modified
        "#,
    )
    .bind(&id)
    .bind(&new_container.name)
    .bind(&new_container.description)
    .bind(&new_container.parent_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(container)
}

/// Get a container by ID
pub async fn get_container(pool: &DbPool, id: &str) -> Result<Option<Container>> {
    let container = sqlx::query_as::<_, Container>(
        r#"
        SELECT id, name, description, parent_id, created, modified
        FROM container
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(container)
}

/// List all containers
pub async fn list_containers(pool: &DbPool) -> Result<Vec<Container>> {
    let containers = sqlx::query_as::<_, Container>(
        r#"
        SELECT id, name, description, parent_id, created, modified
        FROM container
        ORDER BY created, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(containers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_container_crud() {
        let pool = test_pool().await;
        let root = create_container(
            &pool,
            &NewContainer {
                name: "photos".into(),
                description: "holiday pictures".into(),
                parent_id: String::new(),
            },
        )
        .await
        .unwrap();
        let child = create_container(
            &pool,
            &NewContainer {
                name: "2024".into(),
                description: String::new(),
                parent_id: root.id.clone(),
            },
        )
        .await
        .unwrap();

        let fetched = get_container(&pool, &child.id).await.unwrap().unwrap();
        assert_eq!(fetched.parent_id, root.id);
        assert_eq!(list_containers(&pool).await.unwrap().len(), 2);
        assert!(get_container(&pool, "missing").await.unwrap().is_none());
    }
}
