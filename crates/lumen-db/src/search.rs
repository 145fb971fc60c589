//! Relational photo search: filters, candidate filtering and suggestions.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use tracing::debug;

use lumen_core::{
    Error, LibraryStats, Photo, PhotoSearchRepository, Result, SearchCriteria, SuggestionEntry,
    Suggestions,
};

use crate::escape_like;
use crate::photos::{parse_photo_row, PHOTO_COLUMNS};

/// PostgreSQL implementation of PhotoSearchRepository.
#[derive(Clone)]
pub struct PgPhotoSearch {
    pool: Pool<Postgres>,
}

impl PgPhotoSearch {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Append one `AND ...` clause per set criterion. Expects `photos p` in scope.
    fn push_criteria(qb: &mut QueryBuilder<'_, Postgres>, criteria: &SearchCriteria) {
        if !criteria.person_ids.is_empty() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM photo_people pp \
                 WHERE pp.photo_id = p.id AND pp.person_id = ANY(",
            )
            .push_bind(criteria.person_ids.clone())
            .push("))");
        }
        if !criteria.pet_ids.is_empty() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM photo_pets pe \
                 WHERE pe.photo_id = p.id AND pe.pet_id = ANY(",
            )
            .push_bind(criteria.pet_ids.clone())
            .push("))");
        }
        if !criteria.tag_names.is_empty() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM photo_tags pt JOIN tags t ON t.id = pt.tag_id \
                 WHERE pt.photo_id = p.id AND t.name = ANY(",
            )
            .push_bind(criteria.tag_names.clone())
            .push("))");
        }
        if let Some(location) = &criteria.location {
            let pattern = format!("%{}%", escape_like(location));
            qb.push(" AND (p.location_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR p.city ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR p.country ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(country) = &criteria.country {
            qb.push(" AND p.country ILIKE ")
                .push_bind(format!("%{}%", escape_like(country)));
        }
        if let Some(city) = &criteria.city {
            qb.push(" AND p.city ILIKE ")
                .push_bind(format!("%{}%", escape_like(city)));
        }
        if let Some(from) = criteria.date_from {
            qb.push(" AND p.date_taken >= ").push_bind(from);
        }
        if let Some(to) = criteria.date_to {
            qb.push(" AND p.date_taken <= ").push_bind(to);
        }
        if let Some(is_video) = criteria.is_video {
            qb.push(" AND p.is_video = ").push_bind(is_video);
        }
    }

    async fn named_entries(
        &self,
        table: &str,
        pattern: &str,
        limit: i64,
    ) -> Result<Vec<SuggestionEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT id, name FROM {table}
             WHERE is_named AND name ILIKE $1
             ORDER BY name, id
             LIMIT $2"
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| SuggestionEntry {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}

#[async_trait]
impl PhotoSearchRepository for PgPhotoSearch {
    async fn filter(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>> {
        let mut qb = QueryBuilder::new(format!("SELECT {PHOTO_COLUMNS} FROM photos p WHERE TRUE"));
        Self::push_criteria(&mut qb, criteria);
        qb.push(" ORDER BY p.date_taken DESC NULLS LAST, p.id DESC LIMIT ")
            .push_bind(limit.max(0))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "photo_search",
            op = "filter",
            result_count = rows.len(),
            "Filter query complete"
        );
        Ok(rows.iter().map(parse_photo_row).collect())
    }

    async fn filter_ids(&self, candidates: &[i64], criteria: &SearchCriteria) -> Result<Vec<i64>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new("SELECT p.id FROM photos p WHERE p.id = ANY(");
        qb.push_bind(candidates.to_vec()).push(")");
        Self::push_criteria(&mut qb, criteria);

        let ids = qb
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn suggestions(&self, partial: &str, limit: i64) -> Result<Suggestions> {
        let pattern = format!("%{}%", escape_like(partial));

        let people = self.named_entries("people", &pattern, limit).await?;
        let pets = self.named_entries("pets", &pattern, limit).await?;

        let tag_rows = sqlx::query(
            "SELECT id, name FROM tags WHERE name ILIKE $1 ORDER BY name LIMIT $2",
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let tags = tag_rows
            .iter()
            .map(|row| SuggestionEntry {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect();

        let cities = sqlx::query_scalar(
            "SELECT DISTINCT city FROM photos
             WHERE city IS NOT NULL AND city ILIKE $1
             ORDER BY city
             LIMIT $2",
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Suggestions {
            people,
            pets,
            tags,
            cities,
        })
    }

    async fn library_stats(&self) -> Result<LibraryStats> {
        let row = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM photos WHERE NOT is_video) AS total_photos,
                 (SELECT COUNT(*) FROM photos WHERE is_video) AS total_videos,
                 (SELECT COUNT(*) FROM people) AS total_people,
                 (SELECT COUNT(*) FROM pets) AS total_pets,
                 (SELECT COUNT(*) FROM tags) AS total_tags,
                 (SELECT COUNT(*) FROM photos WHERE is_processed) AS processed_count,
                 (SELECT COUNT(*) FROM photos WHERE NOT is_processed) AS unprocessed_count",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(LibraryStats {
            total_photos: row.get("total_photos"),
            total_videos: row.get("total_videos"),
            total_people: row.get("total_people"),
            total_pets: row.get("total_pets"),
            total_tags: row.get("total_tags"),
            processed_count: row.get("processed_count"),
            unprocessed_count: row.get("unprocessed_count"),
        })
    }
}
