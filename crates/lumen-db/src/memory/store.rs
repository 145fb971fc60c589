//! In-process relational store.
//!
//! All tables live behind one mutex, so every repository call is atomic with
//! respect to every other call, the same guarantee the PostgreSQL
//! implementation gets from its transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use lumen_core::{
    Error, Face, FaceRepository, LibraryStats, NewFace, NewPhoto, Person, PersonRepository, Pet,
    Photo,
    PhotoProcessingUpdate, PhotoRepository, PhotoSearchRepository, QueueItem, QueueRepository,
    QueueStats, QueueStatus, Result, SearchCriteria, SuggestionEntry, Suggestions, Tag,
    TagRepository, TaskType,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    photos: BTreeMap<i64, Photo>,
    faces: BTreeMap<i64, Face>,
    people: BTreeMap<i64, Person>,
    /// (photo_id, person_id)
    photo_people: BTreeSet<(i64, i64)>,
    pets: BTreeMap<i64, Pet>,
    /// (photo_id, pet_id)
    photo_pets: BTreeSet<(i64, i64)>,
    tags: BTreeMap<i64, Tag>,
    /// (photo_id, tag_id)
    photo_tags: BTreeSet<(i64, i64)>,
    queue: BTreeMap<i64, QueueItem>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn recount(&mut self, person_id: i64) -> Option<Person> {
        let count = self
            .photo_people
            .iter()
            .filter(|(_, p)| *p == person_id)
            .count() as i64;
        let person = self.people.get_mut(&person_id)?;
        person.photo_count = count;
        Some(person.clone())
    }

    fn face_mut(&mut self, face_id: i64) -> Result<&mut Face> {
        self.faces
            .get_mut(&face_id)
            .ok_or_else(|| Error::NotFound(format!("face {}", face_id)))
    }

    fn matches(&self, photo: &Photo, criteria: &SearchCriteria) -> bool {
        fn contains(haystack: &Option<String>, needle: &str) -> bool {
            haystack
                .as_deref()
                .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false)
        }

        if !criteria.person_ids.is_empty()
            && !criteria
                .person_ids
                .iter()
                .any(|id| self.photo_people.contains(&(photo.id, *id)))
        {
            return false;
        }
        if !criteria.pet_ids.is_empty()
            && !criteria
                .pet_ids
                .iter()
                .any(|id| self.photo_pets.contains(&(photo.id, *id)))
        {
            return false;
        }
        if !criteria.tag_names.is_empty() {
            let has_tag = self
                .photo_tags
                .iter()
                .filter(|(photo_id, _)| *photo_id == photo.id)
                .filter_map(|(_, tag_id)| self.tags.get(tag_id))
                .any(|tag| criteria.tag_names.contains(&tag.name));
            if !has_tag {
                return false;
            }
        }
        if let Some(location) = &criteria.location {
            if !(contains(&photo.location_name, location)
                || contains(&photo.city, location)
                || contains(&photo.country, location))
            {
                return false;
            }
        }
        if let Some(country) = &criteria.country {
            if !contains(&photo.country, country) {
                return false;
            }
        }
        if let Some(city) = &criteria.city {
            if !contains(&photo.city, city) {
                return false;
            }
        }
        if let Some(from) = criteria.date_from {
            if !photo.date_taken.is_some_and(|d| d >= from) {
                return false;
            }
        }
        if let Some(to) = criteria.date_to {
            if !photo.date_taken.is_some_and(|d| d <= to) {
                return false;
            }
        }
        if let Some(is_video) = criteria.is_video {
            if photo.is_video != is_video {
                return false;
            }
        }
        true
    }
}

/// In-process implementation of every relational repository trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pet and link it to `photo_ids`.
    pub fn insert_pet(&self, name: Option<&str>, species: Option<&str>, photo_ids: &[i64]) -> Pet {
        let mut t = self.tables();
        let pet = Pet {
            id: t.next_id(),
            name: name.map(str::to_string),
            species: species.map(str::to_string),
            is_named: name.is_some(),
        };
        t.pets.insert(pet.id, pet.clone());
        for photo_id in photo_ids {
            t.photo_pets.insert((*photo_id, pet.id));
        }
        pet
    }

    /// Delete a photo row, leaving its vector entries and queue items behind.
    ///
    /// Mirrors an out-of-band deletion that neither the vector index nor the
    /// scheduler has seen yet.
    pub fn remove_photo(&self, photo_id: i64) -> bool {
        let mut t = self.tables();
        let removed = t.photos.remove(&photo_id).is_some();
        t.faces.retain(|_, f| f.photo_id != photo_id);
        t.photo_people.retain(|(p, _)| *p != photo_id);
        t.photo_pets.retain(|(p, _)| *p != photo_id);
        t.photo_tags.retain(|(p, _)| *p != photo_id);
        removed
    }

    fn finish(
        &self,
        id: i64,
        to: QueueStatus,
        error: Option<&str>,
        photo_update: Option<&PhotoProcessingUpdate>,
    ) -> Result<()> {
        let mut t = self.tables();
        let item = t
            .queue
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {}", id)))?;
        if !item.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                item_id: id,
                from: item.status,
                to,
            });
        }
        let photo_id = item.photo_id;

        if let Some(update) = photo_update {
            if let Some(photo) = t.photos.get_mut(&photo_id) {
                photo.is_processed = update.is_processed;
                photo.has_embeddings = update.has_embeddings;
                photo.has_faces_processed = update.has_faces_processed;
                photo.thumbnail_small = update.thumbnail_small.clone();
                photo.thumbnail_medium = update.thumbnail_medium.clone();
                photo.thumbnail_large = update.thumbnail_large.clone();
            }
        }

        if let Some(item) = t.queue.get_mut(&id) {
            item.status = to;
            item.error_message = error.map(str::to_string);
            item.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for MemoryStore {
    async fn insert(&self, photo: NewPhoto) -> Result<Photo> {
        let mut t = self.tables();
        if t.photos.values().any(|p| p.file_path == photo.file_path) {
            return Err(Error::InvalidInput(format!(
                "photo already registered: {}",
                photo.file_path
            )));
        }
        let row = Photo {
            id: t.next_id(),
            file_path: photo.file_path,
            file_name: photo.file_name,
            is_video: photo.is_video,
            date_taken: photo.date_taken,
            location_name: photo.location_name,
            country: photo.country,
            city: photo.city,
            is_processed: false,
            has_embeddings: false,
            has_faces_processed: false,
            thumbnail_small: None,
            thumbnail_medium: None,
            thumbnail_large: None,
        };
        t.photos.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Photo>> {
        Ok(self.tables().photos.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Photo>> {
        let t = self.tables();
        Ok(ids.iter().filter_map(|id| t.photos.get(id).cloned()).collect())
    }

    async fn list_unprocessed_ids(&self) -> Result<Vec<i64>> {
        let t = self.tables();
        Ok(t.photos
            .values()
            .filter(|p| !p.is_processed)
            .map(|p| p.id)
            .collect())
    }

    async fn list_faces_pending_ids(&self) -> Result<Vec<i64>> {
        let t = self.tables();
        Ok(t.photos
            .values()
            .filter(|p| !p.has_faces_processed && !p.is_video)
            .map(|p| p.id)
            .collect())
    }

    async fn reset_processed(&self, id: i64) -> Result<()> {
        let mut t = self.tables();
        let photo = t.photos.get_mut(&id).ok_or(Error::PhotoNotFound(id))?;
        photo.is_processed = false;
        Ok(())
    }

    async fn list_video_ids(&self) -> Result<Vec<i64>> {
        let t = self.tables();
        Ok(t.photos.values().filter(|p| p.is_video).map(|p| p.id).collect())
    }
}

#[async_trait]
impl FaceRepository for MemoryStore {
    async fn insert(&self, face: NewFace) -> Result<Face> {
        let mut t = self.tables();
        if !t.photos.contains_key(&face.photo_id) {
            return Err(Error::PhotoNotFound(face.photo_id));
        }
        let row = Face {
            id: t.next_id(),
            photo_id: face.photo_id,
            person_id: None,
            bbox: face.bbox,
            confidence: face.confidence,
            age_estimate: face.age_estimate,
            gender_estimate: face.gender_estimate,
            embedding_id: None,
        };
        t.faces.insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_embedding_id(&self, face_id: i64, embedding_id: &str) -> Result<()> {
        let mut t = self.tables();
        t.face_mut(face_id)?.embedding_id = Some(embedding_id.to_string());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Face>> {
        Ok(self.tables().faces.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Face>> {
        let t = self.tables();
        Ok(ids.iter().filter_map(|id| t.faces.get(id).cloned()).collect())
    }

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<Face>> {
        let t = self.tables();
        Ok(t.faces
            .values()
            .filter(|f| f.photo_id == photo_id)
            .cloned()
            .collect())
    }

    async fn list_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        let t = self.tables();
        Ok(t.faces
            .values()
            .filter(|f| f.person_id == Some(person_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PersonRepository for MemoryStore {
    async fn create_for_face(&self, face: &Face) -> Result<Person> {
        let mut t = self.tables();
        let person = Person {
            id: t.next_id(),
            name: None,
            is_named: false,
            representative_face_id: Some(face.id),
            photo_count: 0,
        };
        let person_id = person.id;
        t.face_mut(face.id)?.person_id = Some(person_id);
        t.people.insert(person_id, person);
        t.photo_people.insert((face.photo_id, person_id));
        t.recount(person_id)
            .ok_or(Error::PersonNotFound(person_id))
    }

    async fn assign_face(&self, face: &Face, person_id: i64) -> Result<Person> {
        let mut t = self.tables();
        if !t.people.contains_key(&person_id) {
            return Err(Error::PersonNotFound(person_id));
        }
        t.face_mut(face.id)?.person_id = Some(person_id);
        t.photo_people.insert((face.photo_id, person_id));
        t.recount(person_id)
            .ok_or(Error::PersonNotFound(person_id))
    }

    async fn get(&self, id: i64) -> Result<Option<Person>> {
        Ok(self.tables().people.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Person>> {
        let mut people: Vec<Person> = self.tables().people.values().cloned().collect();
        people.sort_by(|a, b| b.photo_count.cmp(&a.photo_count).then(a.id.cmp(&b.id)));
        Ok(people)
    }

    async fn rename(&self, id: i64, name: &str) -> Result<Person> {
        let mut t = self.tables();
        let person = t.people.get_mut(&id).ok_or(Error::PersonNotFound(id))?;
        person.name = Some(name.to_string());
        person.is_named = true;
        Ok(person.clone())
    }

    async fn photo_ids(&self, person_id: i64) -> Result<Vec<i64>> {
        let t = self.tables();
        Ok(t.photo_people
            .iter()
            .filter(|(_, p)| *p == person_id)
            .map(|(photo_id, _)| *photo_id)
            .collect())
    }

    async fn merge(&self, target_id: i64, source_id: i64) -> Result<Person> {
        if target_id == source_id {
            return Err(Error::InvalidInput(
                "cannot merge a person with itself".to_string(),
            ));
        }
        let mut t = self.tables();
        if !t.people.contains_key(&target_id) {
            return Err(Error::PersonNotFound(target_id));
        }
        let source = t
            .people
            .remove(&source_id)
            .ok_or(Error::PersonNotFound(source_id))?;

        for face in t.faces.values_mut() {
            if face.person_id == Some(source_id) {
                face.person_id = Some(target_id);
            }
        }

        let mut photos: BTreeSet<i64> = t
            .photo_people
            .iter()
            .filter(|(_, p)| *p == source_id)
            .map(|(photo_id, _)| *photo_id)
            .collect();
        photos.extend(
            t.faces
                .values()
                .filter(|f| f.person_id == Some(target_id))
                .map(|f| f.photo_id),
        );
        t.photo_people.retain(|(_, p)| *p != source_id);
        for photo_id in photos {
            t.photo_people.insert((photo_id, target_id));
        }

        if let Some(target) = t.people.get_mut(&target_id) {
            if target.representative_face_id.is_none() {
                target.representative_face_id = source.representative_face_id;
            }
        }
        t.recount(target_id)
            .ok_or(Error::PersonNotFound(target_id))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut t = self.tables();
        if t.people.remove(&id).is_none() {
            return Err(Error::PersonNotFound(id));
        }
        for face in t.faces.values_mut() {
            if face.person_id == Some(id) {
                face.person_id = None;
            }
        }
        t.photo_people.retain(|(_, p)| *p != id);
        Ok(())
    }
}

#[async_trait]
impl TagRepository for MemoryStore {
    async fn get_or_create(&self, name: &str, category: Option<&str>) -> Result<Tag> {
        let mut t = self.tables();
        if let Some(tag) = t.tags.values().find(|tag| tag.name == name) {
            return Ok(tag.clone());
        }
        let tag = Tag {
            id: t.next_id(),
            name: name.to_string(),
            category: category.map(str::to_string),
        };
        t.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn link_photo(&self, photo_id: i64, tag_id: i64) -> Result<bool> {
        let mut t = self.tables();
        if !t.photos.contains_key(&photo_id) {
            return Err(Error::PhotoNotFound(photo_id));
        }
        Ok(t.photo_tags.insert((photo_id, tag_id)))
    }

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<Tag>> {
        let t = self.tables();
        let mut tags: Vec<Tag> = t
            .photo_tags
            .iter()
            .filter(|(p, _)| *p == photo_id)
            .filter_map(|(_, tag_id)| t.tags.get(tag_id).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }
}

#[async_trait]
impl QueueRepository for MemoryStore {
    async fn enqueue(&self, photo_id: i64, task_type: TaskType, priority: i32) -> Result<i64> {
        let mut t = self.tables();
        if !t.photos.contains_key(&photo_id) {
            return Err(Error::PhotoNotFound(photo_id));
        }
        let item = QueueItem {
            id: t.next_id(),
            photo_id,
            task_type,
            status: QueueStatus::Pending,
            priority,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let id = item.id;
        t.queue.insert(id, item);
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        Ok(self.tables().queue.get(&id).cloned())
    }

    async fn next_pending(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let t = self.tables();
        let mut pending: Vec<QueueItem> = t
            .queue
            .values()
            .filter(|q| q.status == QueueStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processing(&self, id: i64) -> Result<QueueItem> {
        let mut t = self.tables();
        let item = t
            .queue
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {}", id)))?;
        if !item.status.can_transition_to(QueueStatus::Processing) {
            return Err(Error::InvalidTransition {
                item_id: id,
                from: item.status,
                to: QueueStatus::Processing,
            });
        }
        item.status = QueueStatus::Processing;
        item.started_at = Some(Utc::now());
        Ok(item.clone())
    }

    async fn complete(&self, id: i64, photo_update: Option<&PhotoProcessingUpdate>) -> Result<()> {
        self.finish(id, QueueStatus::Completed, None, photo_update)
    }

    async fn fail(
        &self,
        id: i64,
        error: &str,
        photo_update: Option<&PhotoProcessingUpdate>,
    ) -> Result<()> {
        self.finish(id, QueueStatus::Failed, Some(error), photo_update)
    }

    async fn pending_count(&self) -> Result<i64> {
        let t = self.tables();
        Ok(t.queue
            .values()
            .filter(|q| q.status == QueueStatus::Pending)
            .count() as i64)
    }

    async fn remove_pending_for_photo(&self, photo_id: i64) -> Result<u64> {
        let mut t = self.tables();
        let before = t.queue.len();
        t.queue
            .retain(|_, q| !(q.photo_id == photo_id && q.status == QueueStatus::Pending));
        Ok((before - t.queue.len()) as u64)
    }

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<QueueItem>> {
        let t = self.tables();
        Ok(t.queue
            .values()
            .filter(|q| q.photo_id == photo_id)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let t = self.tables();
        let mut stats = QueueStats::default();
        for item in t.queue.values() {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    async fn requeue_for_reprocess(
        &self,
        photo_id: i64,
        task_type: TaskType,
        priority: i32,
    ) -> Result<i64> {
        let mut t = self.tables();
        let photo = t
            .photos
            .get_mut(&photo_id)
            .ok_or(Error::PhotoNotFound(photo_id))?;
        photo.is_processed = false;
        photo.thumbnail_small = None;
        photo.thumbnail_medium = None;
        photo.thumbnail_large = None;

        t.queue
            .retain(|_, q| q.photo_id != photo_id || q.status == QueueStatus::Processing);
        let item = QueueItem {
            id: t.next_id(),
            photo_id,
            task_type,
            status: QueueStatus::Pending,
            priority,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let id = item.id;
        t.queue.insert(id, item);
        Ok(id)
    }
}

#[async_trait]
impl PhotoSearchRepository for MemoryStore {
    async fn filter(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>> {
        let t = self.tables();
        let mut photos: Vec<Photo> = t
            .photos
            .values()
            .filter(|p| t.matches(p, criteria))
            .cloned()
            .collect();
        // Newest first, undated last.
        photos.sort_by(|a, b| match (a.date_taken, b.date_taken) {
            (Some(x), Some(y)) => y.cmp(&x).then(b.id.cmp(&a.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.id.cmp(&a.id),
        });
        Ok(photos
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn filter_ids(&self, candidates: &[i64], criteria: &SearchCriteria) -> Result<Vec<i64>> {
        let t = self.tables();
        Ok(candidates
            .iter()
            .filter_map(|id| t.photos.get(id))
            .filter(|p| t.matches(p, criteria))
            .map(|p| p.id)
            .collect())
    }

    async fn suggestions(&self, partial: &str, limit: i64) -> Result<Suggestions> {
        let t = self.tables();
        let needle = partial.to_lowercase();
        let limit = limit.max(0) as usize;
        let hit = |name: &str| name.to_lowercase().contains(&needle);

        let mut people: Vec<SuggestionEntry> = t
            .people
            .values()
            .filter(|p| p.is_named)
            .filter_map(|p| p.name.as_deref().filter(|n| hit(n)).map(|n| (p.id, n)))
            .map(|(id, name)| SuggestionEntry {
                id,
                name: name.to_string(),
            })
            .collect();
        people.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        people.truncate(limit);

        let mut pets: Vec<SuggestionEntry> = t
            .pets
            .values()
            .filter(|p| p.is_named)
            .filter_map(|p| p.name.as_deref().filter(|n| hit(n)).map(|n| (p.id, n)))
            .map(|(id, name)| SuggestionEntry {
                id,
                name: name.to_string(),
            })
            .collect();
        pets.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        pets.truncate(limit);

        let mut tags: Vec<SuggestionEntry> = t
            .tags
            .values()
            .filter(|tag| hit(&tag.name))
            .map(|tag| SuggestionEntry {
                id: tag.id,
                name: tag.name.clone(),
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags.truncate(limit);

        let cities: BTreeSet<String> = t
            .photos
            .values()
            .filter_map(|p| p.city.clone())
            .filter(|c| hit(c))
            .collect();

        Ok(Suggestions {
            people,
            pets,
            tags,
            cities: cities.into_iter().take(limit).collect(),
        })
    }

    async fn library_stats(&self) -> Result<LibraryStats> {
        let t = self.tables();
        let count = |f: fn(&Photo) -> bool| t.photos.values().filter(|p| f(p)).count() as i64;
        Ok(LibraryStats {
            total_photos: count(|p| !p.is_video),
            total_videos: count(|p| p.is_video),
            total_people: t.people.len() as i64,
            total_pets: t.pets.len() as i64,
            total_tags: t.tags.len() as i64,
            processed_count: count(|p| p.is_processed),
            unprocessed_count: count(|p| !p.is_processed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::BoundingBox;

    async fn photo(store: &MemoryStore, path: &str) -> Photo {
        PhotoRepository::insert(store, NewPhoto::new(path))
            .await
            .unwrap()
    }

    async fn face(store: &MemoryStore, photo_id: i64) -> Face {
        FaceRepository::insert(
            store,
            NewFace {
                photo_id,
                bbox: BoundingBox::new(0.1, 0.1, 0.2, 0.2),
                confidence: 0.9,
                age_estimate: None,
                gender_estimate: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_queue_orders_by_priority_then_insertion() {
        let store = MemoryStore::new();
        let p = photo(&store, "a.jpg").await;
        let low = store.enqueue(p.id, TaskType::Full, 0).await.unwrap();
        let high = store.enqueue(p.id, TaskType::Tags, 5).await.unwrap();
        let low2 = store.enqueue(p.id, TaskType::Faces, 0).await.unwrap();

        let ids: Vec<i64> = store
            .next_pending(10)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(ids, vec![high, low, low2]);
    }

    #[tokio::test]
    async fn test_queue_rejects_backward_transitions() {
        let store = MemoryStore::new();
        let p = photo(&store, "a.jpg").await;
        let id = store.enqueue(p.id, TaskType::Full, 0).await.unwrap();

        assert!(matches!(
            store.complete(id, None).await,
            Err(Error::InvalidTransition { .. })
        ));
        store.mark_processing(id).await.unwrap();
        store.fail(id, "boom", None).await.unwrap();

        assert!(store.mark_processing(id).await.is_err());
        assert!(store.complete(id, None).await.is_err());
        let item = QueueRepository::get(&store, id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_complete_writes_photo_update() {
        let store = MemoryStore::new();
        let p = photo(&store, "a.jpg").await;
        let id = store.enqueue(p.id, TaskType::Full, 0).await.unwrap();
        store.mark_processing(id).await.unwrap();

        let mut update = p.processing_update();
        update.is_processed = true;
        update.thumbnail_small = Some("t/1/200.jpg".into());
        store.complete(id, Some(&update)).await.unwrap();

        let stored = PhotoRepository::get(&store, p.id).await.unwrap().unwrap();
        assert!(stored.is_processed);
        assert_eq!(stored.thumbnail_small.as_deref(), Some("t/1/200.jpg"));
    }

    #[tokio::test]
    async fn test_assign_face_links_photo_once() {
        let store = MemoryStore::new();
        let p = photo(&store, "a.jpg").await;
        let f1 = face(&store, p.id).await;
        let f2 = face(&store, p.id).await;

        let person = store.create_for_face(&f1).await.unwrap();
        assert_eq!(person.photo_count, 1);
        let person = store.assign_face(&f2, person.id).await.unwrap();
        assert_eq!(person.photo_count, 1, "same photo must not be counted twice");
    }

    #[tokio::test]
    async fn test_merge_unions_photos_and_deletes_source() {
        let store = MemoryStore::new();
        let p1 = photo(&store, "a.jpg").await;
        let p2 = photo(&store, "b.jpg").await;
        let fa = face(&store, p1.id).await;
        let fb = face(&store, p2.id).await;
        let fb2 = face(&store, p1.id).await;

        let a = store.create_for_face(&fa).await.unwrap();
        let b = store.create_for_face(&fb).await.unwrap();
        store.assign_face(&fb2, b.id).await.unwrap();

        let merged = store.merge(a.id, b.id).await.unwrap();
        assert_eq!(merged.photo_count, 2);
        assert!(PersonRepository::get(&store, b.id).await.unwrap().is_none());
        assert_eq!(store.list_for_person(a.id).await.unwrap().len(), 3);
        assert!(matches!(
            store.merge(a.id, a.id).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.merge(a.id, 999).await,
            Err(Error::PersonNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_delete_person_unassigns_faces() {
        let store = MemoryStore::new();
        let p = photo(&store, "a.jpg").await;
        let f = face(&store, p.id).await;
        let person = store.create_for_face(&f).await.unwrap();

        PersonRepository::delete(&store, person.id).await.unwrap();
        let f = FaceRepository::get(&store, f.id).await.unwrap().unwrap();
        assert_eq!(f.person_id, None);
        assert!(store.photo_ids(person.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_pending_keeps_history() {
        let store = MemoryStore::new();
        let p = photo(&store, "a.jpg").await;
        let done = store.enqueue(p.id, TaskType::Full, 0).await.unwrap();
        store.mark_processing(done).await.unwrap();
        store.complete(done, None).await.unwrap();
        store.enqueue(p.id, TaskType::Full, 0).await.unwrap();

        assert_eq!(store.remove_pending_for_photo(p.id).await.unwrap(), 1);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_requeue_for_reprocess_clears_thumbnails_and_history() {
        let store = MemoryStore::new();
        let p = photo(&store, "clip.mp4").await;
        let done = store.enqueue(p.id, TaskType::Full, 0).await.unwrap();
        store.mark_processing(done).await.unwrap();
        let mut update = p.processing_update();
        update.is_processed = true;
        update.thumbnail_large = Some("t/1/1200.jpg".into());
        store.complete(done, Some(&update)).await.unwrap();
        let in_flight = store.enqueue(p.id, TaskType::Tags, 0).await.unwrap();
        store.mark_processing(in_flight).await.unwrap();
        store.enqueue(p.id, TaskType::Faces, 0).await.unwrap();

        let fresh = store
            .requeue_for_reprocess(p.id, TaskType::Full, 1)
            .await
            .unwrap();

        let stored = PhotoRepository::get(&store, p.id).await.unwrap().unwrap();
        assert!(!stored.is_processed);
        assert!(!stored.has_thumbnail());
        let ids: Vec<i64> = QueueRepository::list_for_photo(&store, p.id)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(ids, vec![in_flight, fresh]);
        let item = QueueRepository::get(&store, fresh).await.unwrap().unwrap();
        assert_eq!(item.priority, 1);
        assert_eq!(item.status, QueueStatus::Pending);

        assert!(matches!(
            store.requeue_for_reprocess(999, TaskType::Full, 1).await,
            Err(Error::PhotoNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_library_stats_splits_photos_and_videos() {
        let store = MemoryStore::new();
        let still = photo(&store, "a.jpg").await;
        PhotoRepository::insert(&store, NewPhoto::new("b.mp4").video())
            .await
            .unwrap();
        let id = store.enqueue(still.id, TaskType::Full, 0).await.unwrap();
        store.mark_processing(id).await.unwrap();
        let mut update = still.processing_update();
        update.is_processed = true;
        store.complete(id, Some(&update)).await.unwrap();
        let f = face(&store, still.id).await;
        store.create_for_face(&f).await.unwrap();
        store.insert_pet(Some("Rex"), Some("dog"), &[still.id]);
        store.get_or_create("beach", None).await.unwrap();

        let stats = store.library_stats().await.unwrap();
        assert_eq!(
            stats,
            LibraryStats {
                total_photos: 1,
                total_videos: 1,
                total_people: 1,
                total_pets: 1,
                total_tags: 1,
                processed_count: 1,
                unprocessed_count: 1,
            }
        );
    }
}
