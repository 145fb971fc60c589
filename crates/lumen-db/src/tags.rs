//! Tag repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use lumen_core::{Error, Result, Tag, TagRepository};

/// PostgreSQL implementation of TagRepository.
#[derive(Clone)]
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn get_or_create(&self, name: &str, category: Option<&str>) -> Result<Tag> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            "INSERT INTO tags (name, category) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name, category",
        )
        .bind(name)
        .bind(category)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Tag {
            id: row.get("id"),
            name: row.get("name"),
            category: row.get("category"),
        })
    }

    async fn link_photo(&self, photo_id: i64, tag_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO photo_tags (photo_id, tag_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(photo_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.id, t.name, t.category
             FROM tags t
             JOIN photo_tags pt ON pt.tag_id = t.id
             WHERE pt.photo_id = $1
             ORDER BY t.name",
        )
        .bind(photo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| Tag {
                id: row.get("id"),
                name: row.get("name"),
                category: row.get("category"),
            })
            .collect())
    }
}
