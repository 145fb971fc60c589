//! pgvector-backed vector index.
//!
//! Each collection is its own table with an HNSW cosine index. Failures
//! surface as [`Error::VectorIndex`] rather than `Database`, so callers treat
//! the index like any other external collaborator.
//!
//! k-NN queries order by distance alone so the planner can use the HNSW
//! index, and widen `hnsw.ef_search` to at least k for the query's
//! transaction. Past pgvector's ef_search ceiling the index cannot return k
//! rows, so those queries disable index scans and rank exactly.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::trace;

use lumen_core::defaults;
use lumen_core::{Collection, Error, Result, Vector, VectorIndex, VectorMatch, VectorMetadata};

fn table(collection: Collection) -> &'static str {
    match collection {
        Collection::Image => "image_vectors",
        Collection::Face => "face_vectors",
    }
}

fn index_error(collection: Collection, e: sqlx::Error) -> Error {
    Error::VectorIndex(format!("{} collection: {}", collection, e))
}

/// Transaction-local planner setting for a k-NN query of size `k`.
fn knn_setting(k: usize) -> String {
    if k > defaults::HNSW_EF_SEARCH_MAX {
        return "SET LOCAL enable_indexscan = off".to_string();
    }
    format!("SET LOCAL hnsw.ef_search = {}", k.max(defaults::HNSW_EF_SEARCH_MIN))
}

/// PostgreSQL/pgvector implementation of VectorIndex.
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: Pool<Postgres>,
}

impl PgVectorIndex {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: &Vector,
        metadata: VectorMetadata,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, photo_id, face_id, embedding) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET photo_id = EXCLUDED.photo_id, face_id = EXCLUDED.face_id,
                 embedding = EXCLUDED.embedding",
            table(collection)
        ))
        .bind(id)
        .bind(metadata.photo_id)
        .bind(metadata.face_id)
        .bind(vector)
        .execute(&self.pool)
        .await
        .map_err(|e| index_error(collection, e))?;
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &Vector,
        k: usize,
    ) -> Result<Vec<VectorMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| index_error(collection, e))?;
        sqlx::query(&knn_setting(k))
            .execute(&mut *tx)
            .await
            .map_err(|e| index_error(collection, e))?;

        let rows = sqlx::query(&format!(
            "SELECT id, photo_id, face_id, (embedding <=> $1)::real AS distance
             FROM {}
             ORDER BY embedding <=> $1
             LIMIT $2",
            table(collection)
        ))
        .bind(vector)
        .bind(i64::try_from(k).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| index_error(collection, e))?;
        tx.commit().await.map_err(|e| index_error(collection, e))?;

        let matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| VectorMatch {
                id: row.get("id"),
                distance: row.get("distance"),
                metadata: VectorMetadata {
                    photo_id: row.get("photo_id"),
                    face_id: row.get("face_id"),
                },
            })
            .collect();

        trace!(
            subsystem = "db",
            component = "vector_index",
            op = "query",
            collection = %collection,
            result_count = matches.len(),
            "k-NN query complete"
        );
        Ok(matches)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table(collection)))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| index_error(collection, e))?;
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table(collection)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| index_error(collection, e))?;
        Ok(count.0)
    }
}
