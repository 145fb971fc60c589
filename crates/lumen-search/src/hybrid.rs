//! Hybrid photo search: semantic ranking from the image vector index fused
//! with relational filters.
//!
//! Ordering contract:
//! - filter search orders by capture date, newest first
//! - semantic search keeps the index's similarity rank
//! - combined search filters an oversampled semantic candidate set and keeps
//!   the semantic rank of the survivors
//!
//! Pagination always applies to the final ordered list. Ids the index returns
//! for photos that no longer exist are dropped silently.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use lumen_core::defaults;
use lumen_core::{
    Collection, EmbeddingBackend, Error, Library, Photo, Result, SearchConfig, SearchCriteria,
    Suggestions,
};

use crate::ranking::{candidate_count, in_rank_order, page, ranked_photo_ids, retain_ranked};

/// Photo search entry points.
#[async_trait]
pub trait HybridSearch: Send + Sync {
    /// Relational filters only, newest capture date first.
    async fn filter_search(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>>;

    /// Natural-language search in similarity-rank order.
    async fn semantic_search(&self, text: &str, limit: i64, offset: i64) -> Result<Vec<Photo>>;

    /// Semantic ranking restricted to photos matching `criteria`.
    ///
    /// Without text this is [`filter_search`](Self::filter_search).
    async fn combined_search(
        &self,
        text: Option<&str>,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>>;

    /// Per-category substring matches for autocomplete.
    async fn suggestions(&self, partial: &str, limit: i64) -> Result<Suggestions>;
}

/// Search engine over a [`Library`] and an embedding backend.
pub struct HybridSearchEngine {
    library: Library,
    embedder: Arc<dyn EmbeddingBackend>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(library: Library, embedder: Arc<dyn EmbeddingBackend>, config: SearchConfig) -> Self {
        Self {
            library,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Photo ids of the `k` images closest to `text`, best first.
    async fn semantic_candidates(&self, text: &str, k: usize) -> Result<Vec<i64>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed_text(text).await?;
        let matches = self
            .library
            .vectors
            .query(Collection::Image, &query, k)
            .await?;
        for m in &matches {
            trace!(photo_id = m.metadata.photo_id, distance = m.distance, "Semantic candidate");
        }
        Ok(ranked_photo_ids(&matches))
    }

    /// Fetch `ids` and return them in the same order, skipping vanished photos.
    async fn hydrate(&self, ids: &[i64]) -> Result<Vec<Photo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let photos = self.library.photos.get_many(ids).await?;
        let dropped = ids.len().saturating_sub(photos.len());
        if dropped > 0 {
            debug!(dropped, "Index returned ids without photos");
        }
        Ok(in_rank_order(ids, photos))
    }
}

fn query_text(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("search text must not be empty".into()));
    }
    Ok(text)
}

#[async_trait]
impl HybridSearch for HybridSearchEngine {
    #[instrument(skip(self, criteria), fields(subsystem = "search", component = "hybrid_search", op = "filter_search"))]
    async fn filter_search(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let photos = self
            .library
            .search
            .filter(criteria, limit, offset.max(0))
            .await?;
        debug!(result_count = photos.len(), "Filter search complete");
        Ok(photos)
    }

    #[instrument(skip(self), fields(subsystem = "search", component = "hybrid_search", op = "semantic_search"))]
    async fn semantic_search(&self, text: &str, limit: i64, offset: i64) -> Result<Vec<Photo>> {
        let start = Instant::now();
        let text = query_text(text)?;
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let offset = offset.max(0);

        let ranked = self
            .semantic_candidates(text, candidate_count(limit, offset, 1))
            .await?;
        let photos = self.hydrate(&page(&ranked, limit, offset)).await?;

        debug!(
            result_count = photos.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Semantic search complete"
        );
        Ok(photos)
    }

    #[instrument(skip(self, criteria), fields(subsystem = "search", component = "hybrid_search", op = "combined_search"))]
    async fn combined_search(
        &self,
        text: Option<&str>,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>> {
        let text = match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => text,
            None => return self.filter_search(criteria, limit, offset).await,
        };
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let offset = offset.max(0);

        let k = candidate_count(limit, offset, self.config.oversample);
        let ranked = self.semantic_candidates(text, k).await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let survivors = self.library.search.filter_ids(&ranked, criteria).await?;
        let filtered = retain_ranked(&ranked, &survivors);
        let photos = self.hydrate(&page(&filtered, limit, offset)).await?;

        debug!(
            candidates = ranked.len(),
            survivors = filtered.len(),
            result_count = photos.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Combined search complete"
        );
        Ok(photos)
    }

    #[instrument(skip(self), fields(subsystem = "search", component = "hybrid_search", op = "suggestions"))]
    async fn suggestions(&self, partial: &str, limit: i64) -> Result<Suggestions> {
        let partial = partial.trim();
        if partial.is_empty() || limit <= 0 {
            return Ok(Suggestions::default());
        }
        self.library.search.suggestions(partial, limit).await
    }
}

// =============================================================================
// REQUEST BUILDER
// =============================================================================

/// Search request routed to the matching entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: Option<String>,
    #[serde(default)]
    pub criteria: SearchCriteria,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SearchRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn filtered(criteria: SearchCriteria) -> Self {
        Self {
            criteria,
            ..Default::default()
        }
    }

    pub fn with_criteria(mut self, criteria: SearchCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Semantic when only text is given, filter when only criteria are
    /// given, combined otherwise.
    pub async fn execute(&self, engine: &dyn HybridSearch) -> Result<Vec<Photo>> {
        let limit = self.limit.unwrap_or(defaults::PAGE_LIMIT);
        let offset = self.offset.unwrap_or(defaults::PAGE_OFFSET);
        let text = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty());

        match text {
            Some(text) if self.criteria.is_empty() => {
                engine.semantic_search(text, limit, offset).await
            }
            Some(text) => {
                engine
                    .combined_search(Some(text), &self.criteria, limit, offset)
                    .await
            }
            None => engine.filter_search(&self.criteria, limit, offset).await,
        }
    }
}
