//! Exact cosine k-NN over in-process vectors.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use lumen_core::similarity::cosine_distance;
use lumen_core::{Collection, Error, Result, Vector, VectorIndex, VectorMatch, VectorMetadata};

#[derive(Default)]
struct Entries {
    collections: HashMap<Collection, BTreeMap<String, (Vec<f32>, VectorMetadata)>>,
    failing: HashSet<Collection>,
}

/// Brute-force vector index. Results are exact, ties broken by id.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: Mutex<Entries>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every operation on `collection` fail until cleared.
    pub fn set_failing(&self, collection: Collection, failing: bool) {
        let mut entries = self.entries();
        if failing {
            entries.failing.insert(collection);
        } else {
            entries.failing.remove(&collection);
        }
    }

    /// Stored metadata for `id`, if present.
    pub fn metadata(&self, collection: Collection, id: &str) -> Option<VectorMetadata> {
        self.entries()
            .collections
            .get(&collection)
            .and_then(|c| c.get(id))
            .map(|(_, meta)| *meta)
    }

    fn check(entries: &Entries, collection: Collection) -> Result<()> {
        if entries.failing.contains(&collection) {
            return Err(Error::VectorIndex(format!(
                "{} collection unavailable",
                collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: &Vector,
        metadata: VectorMetadata,
    ) -> Result<()> {
        let mut entries = self.entries();
        Self::check(&entries, collection)?;
        entries
            .collections
            .entry(collection)
            .or_default()
            .insert(id.to_string(), (vector.to_vec(), metadata));
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &Vector,
        k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self.entries();
        Self::check(&entries, collection)?;
        let Some(stored) = entries.collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let query = vector.as_slice();
        let mut matches: Vec<VectorMatch> = stored
            .iter()
            .map(|(id, (v, metadata))| VectorMatch {
                id: id.clone(),
                distance: cosine_distance(query, v),
                metadata: *metadata,
            })
            .collect();
        matches.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let mut entries = self.entries();
        Self::check(&entries, collection)?;
        if let Some(stored) = entries.collections.get_mut(&collection) {
            stored.remove(id);
        }
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<i64> {
        let entries = self.entries();
        Self::check(&entries, collection)?;
        Ok(entries
            .collections
            .get(&collection)
            .map(|c| c.len() as i64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> Vector {
        Vector::from(values.to_vec())
    }

    #[tokio::test]
    async fn test_query_returns_closest_first() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(Collection::Image, "1", &v(&[1.0, 0.0]), VectorMetadata::image(1))
            .await
            .unwrap();
        index
            .upsert(Collection::Image, "2", &v(&[0.0, 1.0]), VectorMetadata::image(2))
            .await
            .unwrap();
        index
            .upsert(Collection::Image, "3", &v(&[0.8, 0.6]), VectorMetadata::image(3))
            .await
            .unwrap();

        let hits = index
            .query(Collection::Image, &v(&[1.0, 0.0]), 2)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(Collection::Face, "f", &v(&[1.0]), VectorMetadata::face(1, 9))
            .await
            .unwrap();
        assert_eq!(index.count(Collection::Image).await.unwrap(), 0);
        assert_eq!(index.count(Collection::Face).await.unwrap(), 1);
        assert!(index
            .query(Collection::Image, &v(&[1.0]), 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failing_collection_reports_vector_index_error() {
        let index = MemoryVectorIndex::new();
        index.set_failing(Collection::Face, true);
        let err = index
            .upsert(Collection::Face, "f", &v(&[1.0]), VectorMetadata::face(1, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VectorIndex(_)));
        assert!(err.is_external());

        index.set_failing(Collection::Face, false);
        assert!(index
            .upsert(Collection::Face, "f", &v(&[1.0]), VectorMetadata::face(1, 9))
            .await
            .is_ok());
    }
}
