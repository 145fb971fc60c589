//! Face repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use lumen_core::{BoundingBox, Error, Face, FaceRepository, NewFace, Result};

const FACE_COLUMNS: &str = "id, photo_id, person_id, bbox_x, bbox_y, bbox_width, bbox_height, \
     confidence, age_estimate, gender_estimate, embedding_id";

fn parse_face_row(row: &PgRow) -> Face {
    Face {
        id: row.get("id"),
        photo_id: row.get("photo_id"),
        person_id: row.get("person_id"),
        bbox: BoundingBox::new(
            row.get("bbox_x"),
            row.get("bbox_y"),
            row.get("bbox_width"),
            row.get("bbox_height"),
        ),
        confidence: row.get("confidence"),
        age_estimate: row.get("age_estimate"),
        gender_estimate: row.get("gender_estimate"),
        embedding_id: row.get("embedding_id"),
    }
}

/// PostgreSQL implementation of FaceRepository.
#[derive(Clone)]
pub struct PgFaceRepository {
    pool: Pool<Postgres>,
}

impl PgFaceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FaceRepository for PgFaceRepository {
    async fn insert(&self, face: NewFace) -> Result<Face> {
        let row = sqlx::query(&format!(
            "INSERT INTO faces (photo_id, bbox_x, bbox_y, bbox_width, bbox_height,
                                confidence, age_estimate, gender_estimate)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {FACE_COLUMNS}"
        ))
        .bind(face.photo_id)
        .bind(face.bbox.x)
        .bind(face.bbox.y)
        .bind(face.bbox.width)
        .bind(face.bbox.height)
        .bind(face.confidence)
        .bind(face.age_estimate)
        .bind(&face.gender_estimate)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(parse_face_row(&row))
    }

    async fn set_embedding_id(&self, face_id: i64, embedding_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE faces SET embedding_id = $1 WHERE id = $2")
            .bind(embedding_id)
            .bind(face_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("face {}", face_id)));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Face>> {
        let row = sqlx::query(&format!("SELECT {FACE_COLUMNS} FROM faces WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(parse_face_row))
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Face>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!("SELECT {FACE_COLUMNS} FROM faces WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(parse_face_row).collect())
    }

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<Face>> {
        let rows = sqlx::query(&format!(
            "SELECT {FACE_COLUMNS} FROM faces WHERE photo_id = $1 ORDER BY id"
        ))
        .bind(photo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(parse_face_row).collect())
    }

    async fn list_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        let rows = sqlx::query(&format!(
            "SELECT {FACE_COLUMNS} FROM faces WHERE person_id = $1 ORDER BY id"
        ))
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(parse_face_row).collect())
    }
}
