//! Person repository implementation.
//!
//! Every mutation runs in one transaction and recomputes `photo_count` from
//! the `photo_people` association set instead of incrementing it.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};

use lumen_core::{Error, Face, Person, PersonRepository, Result};

const PERSON_COLUMNS: &str = "id, name, is_named, representative_face_id, photo_count";

fn parse_person_row(row: &PgRow) -> Person {
    Person {
        id: row.get("id"),
        name: row.get("name"),
        is_named: row.get("is_named"),
        representative_face_id: row.get("representative_face_id"),
        photo_count: row.get("photo_count"),
    }
}

/// PostgreSQL implementation of PersonRepository.
#[derive(Clone)]
pub struct PgPersonRepository {
    pool: Pool<Postgres>,
}

impl PgPersonRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Lock the person row, failing with `PersonNotFound` if absent.
    async fn lock(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<()> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM people WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(Error::Database)?;
        found.map(|_| ()).ok_or(Error::PersonNotFound(id))
    }

    async fn recount(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<Person> {
        let row = sqlx::query(&format!(
            "UPDATE people
             SET photo_count = (SELECT COUNT(*) FROM photo_people WHERE person_id = $1)
             WHERE id = $1
             RETURNING {PERSON_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(parse_person_row(&row))
    }
}

#[async_trait]
impl PersonRepository for PgPersonRepository {
    async fn create_for_face(&self, face: &Face) -> Result<Person> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let person_id: i64 = sqlx::query_scalar(
            "INSERT INTO people (is_named, representative_face_id, photo_count)
             VALUES (FALSE, $1, 0)
             RETURNING id",
        )
        .bind(face.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("UPDATE faces SET person_id = $1 WHERE id = $2")
            .bind(person_id)
            .bind(face.id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO photo_people (photo_id, person_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(face.photo_id)
        .bind(person_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let person = Self::recount(&mut tx, person_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(person)
    }

    async fn assign_face(&self, face: &Face, person_id: i64) -> Result<Person> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock(&mut tx, person_id).await?;

        sqlx::query("UPDATE faces SET person_id = $1 WHERE id = $2")
            .bind(person_id)
            .bind(face.id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO photo_people (photo_id, person_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(face.photo_id)
        .bind(person_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let person = Self::recount(&mut tx, person_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(person)
    }

    async fn get(&self, id: i64) -> Result<Option<Person>> {
        let row = sqlx::query(&format!("SELECT {PERSON_COLUMNS} FROM people WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(parse_person_row))
    }

    async fn list(&self) -> Result<Vec<Person>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM people ORDER BY photo_count DESC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(parse_person_row).collect())
    }

    async fn rename(&self, id: i64, name: &str) -> Result<Person> {
        let row = sqlx::query(&format!(
            "UPDATE people SET name = $1, is_named = TRUE WHERE id = $2 RETURNING {PERSON_COLUMNS}"
        ))
        .bind(name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(parse_person_row)
            .ok_or(Error::PersonNotFound(id))
    }

    async fn photo_ids(&self, person_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT photo_id FROM photo_people WHERE person_id = $1 ORDER BY photo_id",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn merge(&self, target_id: i64, source_id: i64) -> Result<Person> {
        if target_id == source_id {
            return Err(Error::InvalidInput(
                "cannot merge a person with itself".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Lock in id order so two opposite merges cannot deadlock.
        let (first, second) = if target_id < source_id {
            (target_id, source_id)
        } else {
            (source_id, target_id)
        };
        Self::lock(&mut tx, first).await?;
        Self::lock(&mut tx, second).await?;

        sqlx::query("UPDATE faces SET person_id = $1 WHERE person_id = $2")
            .bind(target_id)
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO photo_people (photo_id, person_id)
             SELECT photo_id, $1::bigint FROM photo_people WHERE person_id = $2
             UNION
             SELECT photo_id, $1::bigint FROM faces WHERE person_id = $1
             ON CONFLICT DO NOTHING",
        )
        .bind(target_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE people
             SET representative_face_id = COALESCE(
                 representative_face_id,
                 (SELECT representative_face_id FROM people WHERE id = $2))
             WHERE id = $1",
        )
        .bind(target_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM people WHERE id = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let person = Self::recount(&mut tx, target_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(person)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock(&mut tx, id).await?;

        sqlx::query("UPDATE faces SET person_id = NULL WHERE person_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        // photo_people rows go with the person (ON DELETE CASCADE).
        sqlx::query("DELETE FROM people WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
