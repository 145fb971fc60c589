//! Processing queue repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};

use lumen_core::{
    Error, PhotoProcessingUpdate, QueueItem, QueueRepository, QueueStats, QueueStatus, Result,
    TaskType,
};

const QUEUE_COLUMNS: &str = "id, photo_id, task_type, status, priority, error_message, \
     created_at, started_at, completed_at";

/// PostgreSQL implementation of QueueRepository.
#[derive(Clone)]
pub struct PgQueueRepository {
    pool: Pool<Postgres>,
}

impl PgQueueRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a queue row into a QueueItem.
    fn parse_queue_row(row: &PgRow) -> Result<QueueItem> {
        let task_type: String = row.get("task_type");
        let status: String = row.get("status");
        Ok(QueueItem {
            id: row.get("id"),
            photo_id: row.get("photo_id"),
            task_type: task_type.parse()?,
            status: status.parse()?,
            priority: row.get("priority"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Lock the item and check that `to` is reachable from its status.
    /// Returns the item's photo id.
    async fn lock_for_transition(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        to: QueueStatus,
    ) -> Result<i64> {
        let row = sqlx::query("SELECT photo_id, status FROM processing_queue WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("queue item {}", id)))?;

        let status: String = row.get("status");
        let from: QueueStatus = status.parse()?;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                item_id: id,
                from,
                to,
            });
        }
        Ok(row.get("photo_id"))
    }

    async fn write_photo_update(
        tx: &mut Transaction<'_, Postgres>,
        photo_id: i64,
        update: &PhotoProcessingUpdate,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE photos
             SET is_processed = $1, has_embeddings = $2, has_faces_processed = $3,
                 thumbnail_small = $4, thumbnail_medium = $5, thumbnail_large = $6
             WHERE id = $7",
        )
        .bind(update.is_processed)
        .bind(update.has_embeddings)
        .bind(update.has_faces_processed)
        .bind(&update.thumbnail_small)
        .bind(&update.thumbnail_medium)
        .bind(&update.thumbnail_large)
        .bind(photo_id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn finish(
        &self,
        id: i64,
        to: QueueStatus,
        error: Option<&str>,
        photo_update: Option<&PhotoProcessingUpdate>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let photo_id = Self::lock_for_transition(&mut tx, id, to).await?;

        if let Some(update) = photo_update {
            Self::write_photo_update(&mut tx, photo_id, update).await?;
        }

        sqlx::query(
            "UPDATE processing_queue
             SET status = $1, error_message = $2, completed_at = $3
             WHERE id = $4",
        )
        .bind(to.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn enqueue(&self, photo_id: i64, task_type: TaskType, priority: i32) -> Result<i64> {
        let id = sqlx::query_scalar(
            "INSERT INTO processing_queue (photo_id, task_type, status, priority, created_at)
             VALUES ($1, $2, 'pending', $3, $4)
             RETURNING id",
        )
        .bind(photo_id)
        .bind(task_type.as_str())
        .bind(priority)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_queue_row).transpose()
    }

    async fn next_pending(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_queue_row).collect()
    }

    async fn mark_processing(&self, id: i64) -> Result<QueueItem> {
        let row = sqlx::query(&format!(
            "UPDATE processing_queue
             SET status = 'processing', started_at = $1
             WHERE id = $2 AND status = 'pending'
             RETURNING {QUEUE_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_queue_row(&row),
            None => match self.get(id).await? {
                Some(item) => Err(Error::InvalidTransition {
                    item_id: id,
                    from: item.status,
                    to: QueueStatus::Processing,
                }),
                None => Err(Error::NotFound(format!("queue item {}", id))),
            },
        }
    }

    async fn complete(&self, id: i64, photo_update: Option<&PhotoProcessingUpdate>) -> Result<()> {
        self.finish(id, QueueStatus::Completed, None, photo_update)
            .await
    }

    async fn fail(
        &self,
        id: i64,
        error: &str,
        photo_update: Option<&PhotoProcessingUpdate>,
    ) -> Result<()> {
        self.finish(id, QueueStatus::Failed, Some(error), photo_update)
            .await
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM processing_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(count.0)
    }

    async fn remove_pending_for_photo(&self, photo_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM processing_queue WHERE photo_id = $1 AND status = 'pending'",
        )
        .bind(photo_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE photo_id = $1 ORDER BY id"
        ))
        .bind(photo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_queue_row).collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM processing_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.parse::<QueueStatus>()? {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Completed => stats.completed = count,
                QueueStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    async fn requeue_for_reprocess(
        &self,
        photo_id: i64,
        task_type: TaskType,
        priority: i32,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let reset = sqlx::query(
            "UPDATE photos
             SET is_processed = FALSE,
                 thumbnail_small = NULL, thumbnail_medium = NULL, thumbnail_large = NULL
             WHERE id = $1",
        )
        .bind(photo_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if reset.rows_affected() == 0 {
            return Err(Error::PhotoNotFound(photo_id));
        }

        sqlx::query("DELETE FROM processing_queue WHERE photo_id = $1 AND status <> 'processing'")
            .bind(photo_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let id = sqlx::query_scalar(
            "INSERT INTO processing_queue (photo_id, task_type, status, priority, created_at)
             VALUES ($1, $2, 'pending', $3, $4)
             RETURNING id",
        )
        .bind(photo_id)
        .bind(task_type.as_str())
        .bind(priority)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(id)
    }
}
