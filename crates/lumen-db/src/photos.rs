//! Photo repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use lumen_core::{Error, NewPhoto, Photo, PhotoRepository, Result};

/// Column list shared by every query that materializes a [`Photo`].
pub(crate) const PHOTO_COLUMNS: &str = "p.id, p.file_path, p.file_name, p.is_video, p.date_taken, \
     p.location_name, p.country, p.city, p.is_processed, p.has_embeddings, \
     p.has_faces_processed, p.thumbnail_small, p.thumbnail_medium, p.thumbnail_large";

/// Parse a row selected with [`PHOTO_COLUMNS`].
pub(crate) fn parse_photo_row(row: &PgRow) -> Photo {
    Photo {
        id: row.get("id"),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        is_video: row.get("is_video"),
        date_taken: row.get("date_taken"),
        location_name: row.get("location_name"),
        country: row.get("country"),
        city: row.get("city"),
        is_processed: row.get("is_processed"),
        has_embeddings: row.get("has_embeddings"),
        has_faces_processed: row.get("has_faces_processed"),
        thumbnail_small: row.get("thumbnail_small"),
        thumbnail_medium: row.get("thumbnail_medium"),
        thumbnail_large: row.get("thumbnail_large"),
    }
}

/// PostgreSQL implementation of PhotoRepository.
#[derive(Clone)]
pub struct PgPhotoRepository {
    pool: Pool<Postgres>,
}

impl PgPhotoRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PhotoRepository for PgPhotoRepository {
    async fn insert(&self, photo: NewPhoto) -> Result<Photo> {
        let row = sqlx::query(&format!(
            "INSERT INTO photos AS p (file_path, file_name, is_video, date_taken, location_name, country, city)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(&photo.file_path)
        .bind(&photo.file_name)
        .bind(photo.is_video)
        .bind(photo.date_taken)
        .bind(&photo.location_name)
        .bind(&photo.country)
        .bind(&photo.city)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(parse_photo_row(&row))
    }

    async fn get(&self, id: i64) -> Result<Option<Photo>> {
        let row = sqlx::query(&format!("SELECT {PHOTO_COLUMNS} FROM photos p WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(parse_photo_row))
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Photo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos p WHERE p.id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(parse_photo_row).collect())
    }

    async fn list_unprocessed_ids(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM photos WHERE NOT is_processed ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn list_faces_pending_ids(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM photos WHERE NOT has_faces_processed AND NOT is_video ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn reset_processed(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE photos SET is_processed = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::PhotoNotFound(id));
        }
        Ok(())
    }

    async fn list_video_ids(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM photos WHERE is_video ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(ids)
    }
}
