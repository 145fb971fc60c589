//! Face identity resolution: greedy online clustering of faces into people.
//!
//! A new face joins the person owning its closest neighbor in the face
//! collection, provided the neighbor is closer than the match threshold.
//! Otherwise it seeds a new, unnamed person.
//!
//! Resolution reads neighbors and then mutates a person without holding a
//! lock across the two. Callers run at most one resolver at a time, which
//! the scheduler's single-worker model guarantees.

use std::collections::HashMap;

use tracing::{debug, info, instrument, trace, warn};

use lumen_core::{Collection, Error, Face, Library, Person, ResolverConfig, Result, Vector, VectorMatch};

/// How a face was resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Joined the person owning the nearest qualifying neighbor.
    Matched { person_id: i64, distance: f32 },
    /// Seeded a new person.
    Created { person_id: i64 },
}

impl Resolution {
    pub fn person_id(&self) -> i64 {
        match *self {
            Resolution::Matched { person_id, .. } | Resolution::Created { person_id } => person_id,
        }
    }
}

/// Assigns faces to people and performs manual identity corrections.
#[derive(Clone)]
pub struct FaceIdentityResolver {
    library: Library,
    config: ResolverConfig,
}

impl FaceIdentityResolver {
    pub fn new(library: Library, config: ResolverConfig) -> Self {
        Self { library, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Assign `face` to a person, creating one when no neighbor qualifies.
    ///
    /// `embedding` is the face's identity embedding. The face's own index
    /// entry, if present, is never treated as a neighbor.
    #[instrument(
        skip(self, face, embedding),
        fields(subsystem = "jobs", component = "resolver", op = "resolve", face_id = face.id, photo_id = face.photo_id)
    )]
    pub async fn resolve(&self, face: &Face, embedding: &Vector) -> Result<(Person, Resolution)> {
        let neighbors = self.neighbors(face, embedding).await;

        if let Some((person_id, distance)) = self.nearest_owned(&neighbors).await? {
            match self.library.people.assign_face(face, person_id).await {
                Ok(person) => {
                    debug!(person_id, distance, "Face matched existing person");
                    return Ok((person, Resolution::Matched { person_id, distance }));
                }
                Err(Error::PersonNotFound(_)) => {
                    warn!(person_id, "Matched person vanished, creating a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let person = self.library.people.create_for_face(face).await?;
        debug!(person_id = person.id, "Face seeded new person");
        let resolution = Resolution::Created {
            person_id: person.id,
        };
        Ok((person, resolution))
    }

    /// Up to `neighbor_count` nearest faces excluding `face` itself.
    ///
    /// An index failure degrades to "no neighbors" so the face still gets a person.
    async fn neighbors(&self, face: &Face, embedding: &Vector) -> Vec<VectorMatch> {
        let k = self.config.neighbor_count + usize::from(face.embedding_id.is_some());
        let matches = match self
            .library
            .vectors
            .query(Collection::Face, embedding, k)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Face neighbor query failed, treating as no neighbors");
                return Vec::new();
            }
        };

        matches
            .into_iter()
            .filter(|m| Some(m.id.as_str()) != face.embedding_id.as_deref())
            .filter(|m| m.metadata.face_id != Some(face.id))
            .take(self.config.neighbor_count)
            .collect()
    }

    /// Closest neighbor under the threshold whose face still has a person.
    async fn nearest_owned(&self, neighbors: &[VectorMatch]) -> Result<Option<(i64, f32)>> {
        let close: Vec<(i64, f32)> = neighbors
            .iter()
            .filter(|m| m.distance < self.config.match_threshold)
            .filter_map(|m| m.metadata.face_id.map(|id| (id, m.distance)))
            .collect();
        if close.is_empty() {
            return Ok(None);
        }

        let ids: Vec<i64> = close.iter().map(|(id, _)| *id).collect();
        let owners: HashMap<i64, i64> = self
            .library
            .faces
            .get_many(&ids)
            .await?
            .into_iter()
            .filter_map(|f| f.person_id.map(|p| (f.id, p)))
            .collect();

        for (face_id, distance) in close {
            trace!(neighbor_face_id = face_id, distance, "Inspecting neighbor");
            if let Some(&person_id) = owners.get(&face_id) {
                return Ok(Some((person_id, distance)));
            }
        }
        Ok(None)
    }

    /// Fold `source_id` into `target_id`.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "resolver", op = "merge"))]
    pub async fn merge_persons(&self, target_id: i64, source_id: i64) -> Result<Person> {
        if target_id == source_id {
            return Err(Error::InvalidInput(format!(
                "cannot merge person {} into itself",
                target_id
            )));
        }
        let person = self.library.people.merge(target_id, source_id).await?;
        info!(
            person_id = person.id,
            merged_person_id = source_id,
            photo_count = person.photo_count,
            "Merged people"
        );
        Ok(person)
    }

    /// Delete a person, leaving its faces unassigned.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "resolver", op = "delete_person"))]
    pub async fn delete_person(&self, person_id: i64) -> Result<()> {
        self.library.people.delete(person_id).await?;
        info!(person_id, "Deleted person");
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "jobs", component = "resolver", op = "rename_person"))]
    pub async fn rename_person(&self, person_id: i64, name: &str) -> Result<Person> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("person name must not be empty".into()));
        }
        self.library.people.rename(person_id, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{BoundingBox, NewFace, NewPhoto, VectorMetadata};
    use lumen_db::memory::{empty_library, MemoryVectorIndex};
    use std::sync::Arc;

    fn axis(i: usize) -> Vector {
        let mut v = vec![0.0; 8];
        v[i] = 1.0;
        Vector::from(v)
    }

    fn blend(a: usize, b: usize, wa: f32) -> Vector {
        let mut v = vec![0.0; 8];
        v[a] = wa;
        v[b] = (1.0 - wa * wa).sqrt();
        Vector::from(v)
    }

    /// Insert a face row and its index entry the way the faces step does.
    async fn add_face(lib: &Library, path: &str, embedding: &Vector) -> Face {
        let photo = lib.photos.insert(NewPhoto::new(path)).await.unwrap();
        let face = lib
            .faces
            .insert(NewFace {
                photo_id: photo.id,
                bbox: BoundingBox::new(0.1, 0.1, 0.2, 0.2),
                confidence: 0.9,
                age_estimate: None,
                gender_estimate: None,
            })
            .await
            .unwrap();
        let vid = lumen_core::new_face_vector_id();
        lib.vectors
            .upsert(
                Collection::Face,
                &vid,
                embedding,
                VectorMetadata::face(photo.id, face.id),
            )
            .await
            .unwrap();
        lib.faces.set_embedding_id(face.id, &vid).await.unwrap();
        lib.faces.get(face.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_only_self_in_index_creates_person() {
        let (lib, _, _) = empty_library();
        let resolver = FaceIdentityResolver::new(lib.clone(), ResolverConfig::default());

        let e = axis(0);
        let face = add_face(&lib, "/a.jpg", &e).await;
        let (person, resolution) = resolver.resolve(&face, &e).await.unwrap();

        assert_eq!(resolution, Resolution::Created { person_id: person.id });
        assert_eq!(person.photo_count, 1);
        assert_eq!(person.representative_face_id, Some(face.id));
        assert!(!person.is_named);
    }

    #[tokio::test]
    async fn test_close_face_joins_existing_person() {
        let (lib, _, _) = empty_library();
        let resolver = FaceIdentityResolver::new(lib.clone(), ResolverConfig::default());

        let first = add_face(&lib, "/a.jpg", &axis(0)).await;
        let (alice, _) = resolver.resolve(&first, &axis(0)).await.unwrap();

        let near = blend(0, 1, 0.95);
        let second = add_face(&lib, "/b.jpg", &near).await;
        let (person, resolution) = resolver.resolve(&second, &near).await.unwrap();

        assert_eq!(person.id, alice.id);
        assert!(matches!(resolution, Resolution::Matched { person_id, .. } if person_id == alice.id));
        assert_eq!(person.photo_count, 2);
    }

    #[tokio::test]
    async fn test_distance_at_threshold_does_not_match() {
        let (lib, _, _) = empty_library();
        // Orthogonal vectors are at distance exactly 1.0.
        let resolver = FaceIdentityResolver::new(
            lib.clone(),
            ResolverConfig::default().with_match_threshold(1.0),
        );

        let first = add_face(&lib, "/a.jpg", &axis(0)).await;
        let (p1, _) = resolver.resolve(&first, &axis(0)).await.unwrap();
        let second = add_face(&lib, "/b.jpg", &axis(1)).await;
        let (p2, resolution) = resolver.resolve(&second, &axis(1)).await.unwrap();

        assert_ne!(p1.id, p2.id);
        assert!(matches!(resolution, Resolution::Created { .. }));
    }

    #[tokio::test]
    async fn test_unowned_neighbor_is_skipped_for_next_closest() {
        let (lib, _, _) = empty_library();
        let resolver = FaceIdentityResolver::new(lib.clone(), ResolverConfig::default());

        let owned = add_face(&lib, "/owned.jpg", &blend(0, 1, 0.9)).await;
        let (owner, _) = resolver.resolve(&owned, &blend(0, 1, 0.9)).await.unwrap();
        // Closer neighbor that was never assigned a person.
        let orphan = add_face(&lib, "/orphan.jpg", &blend(0, 2, 0.99)).await;
        assert!(orphan.person_id.is_none());

        let face = add_face(&lib, "/new.jpg", &axis(0)).await;
        let (person, _) = resolver.resolve(&face, &axis(0)).await.unwrap();
        assert_eq!(person.id, owner.id);
    }

    #[tokio::test]
    async fn test_face_without_vector_entry_still_resolves() {
        let (lib, _, _) = empty_library();
        let resolver = FaceIdentityResolver::new(lib.clone(), ResolverConfig::default());

        let first = add_face(&lib, "/a.jpg", &axis(3)).await;
        let (p1, _) = resolver.resolve(&first, &axis(3)).await.unwrap();

        let photo = lib.photos.insert(NewPhoto::new("/b.jpg")).await.unwrap();
        let face = lib
            .faces
            .insert(NewFace {
                photo_id: photo.id,
                bbox: BoundingBox::default(),
                confidence: 0.5,
                age_estimate: None,
                gender_estimate: None,
            })
            .await
            .unwrap();
        assert!(face.embedding_id.is_none());
        let (p2, _) = resolver.resolve(&face, &axis(3)).await.unwrap();
        assert_eq!(p1.id, p2.id);
    }

    #[tokio::test]
    async fn test_index_failure_falls_back_to_new_person() {
        let (_, store, _) = empty_library();
        let vectors = Arc::new(MemoryVectorIndex::new());
        let lib = lumen_db::memory::library(store, vectors.clone());
        let resolver = FaceIdentityResolver::new(lib.clone(), ResolverConfig::default());

        let first = add_face(&lib, "/a.jpg", &axis(0)).await;
        resolver.resolve(&first, &axis(0)).await.unwrap();

        vectors.set_failing(Collection::Face, true);
        let photo = lib.photos.insert(NewPhoto::new("/b.jpg")).await.unwrap();
        let face = lib
            .faces
            .insert(NewFace {
                photo_id: photo.id,
                bbox: BoundingBox::default(),
                confidence: 0.5,
                age_estimate: None,
                gender_estimate: None,
            })
            .await
            .unwrap();
        let (person, resolution) = resolver.resolve(&face, &axis(0)).await.unwrap();
        assert!(matches!(resolution, Resolution::Created { .. }));
        assert_eq!(person.representative_face_id, Some(face.id));
    }

    #[tokio::test]
    async fn test_merge_into_self_is_rejected() {
        let (lib, _, _) = empty_library();
        let resolver = FaceIdentityResolver::new(lib, ResolverConfig::default());
        let err = resolver.merge_persons(4, 4).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rename_rejects_blank_name() {
        let (lib, _, _) = empty_library();
        let resolver = FaceIdentityResolver::new(lib.clone(), ResolverConfig::default());
        let face = add_face(&lib, "/a.jpg", &axis(0)).await;
        let (person, _) = resolver.resolve(&face, &axis(0)).await.unwrap();

        assert!(resolver.rename_person(person.id, "   ").await.is_err());
        let named = resolver.rename_person(person.id, " Ada ").await.unwrap();
        assert_eq!(named.name.as_deref(), Some("Ada"));
        assert!(named.is_named);
    }
}
