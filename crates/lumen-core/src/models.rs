//! Core data models for the photo library.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// Re-export pgvector's Vector so every crate shares one embedding type.
pub use pgvector::Vector;

// =============================================================================
// PHOTO
// =============================================================================

/// A photo or video in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub is_video: bool,
    pub date_taken: Option<DateTime<Utc>>,
    pub location_name: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub is_processed: bool,
    pub has_embeddings: bool,
    pub has_faces_processed: bool,
    pub thumbnail_small: Option<String>,
    pub thumbnail_medium: Option<String>,
    pub thumbnail_large: Option<String>,
}

impl Photo {
    /// Snapshot of the fields enrichment is allowed to change.
    pub fn processing_update(&self) -> PhotoProcessingUpdate {
        PhotoProcessingUpdate {
            is_processed: self.is_processed,
            has_embeddings: self.has_embeddings,
            has_faces_processed: self.has_faces_processed,
            thumbnail_small: self.thumbnail_small.clone(),
            thumbnail_medium: self.thumbnail_medium.clone(),
            thumbnail_large: self.thumbnail_large.clone(),
        }
    }

    /// True if at least one thumbnail path is recorded.
    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_small.is_some()
            || self.thumbnail_medium.is_some()
            || self.thumbnail_large.is_some()
    }
}

/// Request for registering a photo in the library.
///
/// Import itself (hashing, EXIF, geocoding) happens upstream; this carries the
/// columns the pipeline and search depend on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPhoto {
    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub is_video: bool,
    pub date_taken: Option<DateTime<Utc>>,
    pub location_name: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl NewPhoto {
    pub fn new(file_path: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let file_name = std::path::Path::new(&file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.clone());
        Self {
            file_path,
            file_name,
            ..Default::default()
        }
    }

    pub fn video(mut self) -> Self {
        self.is_video = true;
        self
    }

    pub fn taken_at(mut self, date: DateTime<Utc>) -> Self {
        self.date_taken = Some(date);
        self
    }

    pub fn located(
        mut self,
        location_name: Option<&str>,
        city: Option<&str>,
        country: Option<&str>,
    ) -> Self {
        self.location_name = location_name.map(str::to_string);
        self.city = city.map(str::to_string);
        self.country = country.map(str::to_string);
        self
    }
}

/// Photo fields written back by one processing pass.
///
/// Committed in the same transaction as the queue item's terminal transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoProcessingUpdate {
    pub is_processed: bool,
    pub has_embeddings: bool,
    pub has_faces_processed: bool,
    pub thumbnail_small: Option<String>,
    pub thumbnail_medium: Option<String>,
    pub thumbnail_large: Option<String>,
}

// =============================================================================
// FACES AND PEOPLE
// =============================================================================

/// Face bounding box, normalized to the image dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Normalize a pixel-space box against the image size, clamped to [0, 1].
    pub fn from_pixels(x: f32, y: f32, width: f32, height: f32, img_w: u32, img_h: u32) -> Self {
        let w = img_w.max(1) as f32;
        let h = img_h.max(1) as f32;
        Self::new(x / w, y / h, width / w, height / h).clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
            width: self.width.clamp(0.0, 1.0),
            height: self.height.clamp(0.0, 1.0),
        }
    }
}

/// One face returned by a face detector.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// L2-normalized identity embedding.
    pub embedding: Vector,
    pub age: Option<i32>,
    pub gender: Option<String>,
}

/// A detected face stored in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: i64,
    pub photo_id: i64,
    pub person_id: Option<i64>,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub age_estimate: Option<i32>,
    pub gender_estimate: Option<String>,
    /// Id of this face's entry in the face vector collection, if the insert succeeded.
    pub embedding_id: Option<String>,
}

/// Request for creating a face row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFace {
    pub photo_id: i64,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub age_estimate: Option<i32>,
    pub gender_estimate: Option<String>,
}

impl NewFace {
    pub fn from_detection(photo_id: i64, detection: &FaceDetection) -> Self {
        Self {
            photo_id,
            bbox: detection.bbox.clamped(),
            confidence: detection.confidence,
            age_estimate: detection.age,
            gender_estimate: detection.gender.clone(),
        }
    }
}

/// A cluster of faces believed to be the same individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: Option<String>,
    pub is_named: bool,
    pub representative_face_id: Option<i64>,
    /// Distinct photos linked to this person.
    pub photo_count: i64,
}

/// A pet, referenced by filter search and suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: i64,
    pub name: Option<String>,
    pub species: Option<String>,
    pub is_named: bool,
}

// =============================================================================
// TAGS
// =============================================================================

/// A tag attached to photos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
}

/// A zero-shot tag prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPrediction {
    pub name: String,
    pub category: String,
    pub confidence: f32,
}

// =============================================================================
// PROCESSING QUEUE
// =============================================================================

/// Kind of work a queue item requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Thumbnails, embeddings, faces, then tags.
    Full,
    Thumbnails,
    Embeddings,
    Faces,
    Tags,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Full => "full",
            TaskType::Thumbnails => "thumbnails",
            TaskType::Embeddings => "embeddings",
            TaskType::Faces => "faces",
            TaskType::Tags => "tags",
        }
    }

    /// Enrichment steps this task runs, in order.
    pub fn steps(self) -> &'static [EnrichmentStep] {
        match self {
            TaskType::Full => &EnrichmentStep::ALL,
            TaskType::Thumbnails => &[EnrichmentStep::Thumbnails],
            TaskType::Embeddings => &[EnrichmentStep::Embeddings],
            TaskType::Faces => &[EnrichmentStep::Faces],
            TaskType::Tags => &[EnrichmentStep::Tags],
        }
    }

    /// Whether completing this task marks the photo as fully processed.
    pub fn marks_processed(self) -> bool {
        matches!(self, TaskType::Full)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(TaskType::Full),
            "thumbnails" => Ok(TaskType::Thumbnails),
            "embeddings" => Ok(TaskType::Embeddings),
            "faces" => Ok(TaskType::Faces),
            "tags" => Ok(TaskType::Tags),
            other => Err(Error::InvalidInput(format!("unknown task type: {}", other))),
        }
    }
}

/// A single enrichment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStep {
    Thumbnails,
    Embeddings,
    Faces,
    Tags,
}

impl EnrichmentStep {
    /// The full enrichment sequence.
    pub const ALL: [EnrichmentStep; 4] = [
        EnrichmentStep::Thumbnails,
        EnrichmentStep::Embeddings,
        EnrichmentStep::Faces,
        EnrichmentStep::Tags,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnrichmentStep::Thumbnails => "thumbnails",
            EnrichmentStep::Embeddings => "embeddings",
            EnrichmentStep::Faces => "faces",
            EnrichmentStep::Tags => "tags",
        }
    }
}

impl fmt::Display for EnrichmentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a queue item.
///
/// Transitions are one-directional: `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    /// Whether `self -> next` is a permitted transition.
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Completed)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(Error::Serialization(format!(
                "unknown queue status: {}",
                other
            ))),
        }
    }
}

/// A processing queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub photo_id: i64,
    pub task_type: TaskType,
    pub status: QueueStatus,
    pub priority: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Item counts per queue status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// Library-wide row counts. `total_photos` excludes videos; the processed
/// counts cover both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub total_photos: i64,
    pub total_videos: i64,
    pub total_people: i64,
    pub total_pets: i64,
    pub total_tags: i64,
    pub processed_count: i64,
    pub unprocessed_count: i64,
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Partition of the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Image,
    Face,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Image => "image",
            Collection::Face => "face",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stored next to each vector, enough to join back to relational rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub photo_id: i64,
    pub face_id: Option<i64>,
}

impl VectorMetadata {
    pub fn image(photo_id: i64) -> Self {
        Self {
            photo_id,
            face_id: None,
        }
    }

    pub fn face(photo_id: i64, face_id: i64) -> Self {
        Self {
            photo_id,
            face_id: Some(face_id),
        }
    }
}

/// One k-NN result, ordered by ascending cosine distance.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub distance: f32,
    pub metadata: VectorMetadata,
}

/// Vector id for a photo's image embedding.
pub fn image_vector_id(photo_id: i64) -> String {
    photo_id.to_string()
}

/// Fresh vector id for a face embedding.
pub fn new_face_vector_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

// =============================================================================
// SEARCH
// =============================================================================

/// Relational filters for photo search. Membership filters match any-of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub person_ids: Vec<i64>,
    #[serde(default)]
    pub pet_ids: Vec<i64>,
    #[serde(default)]
    pub tag_names: Vec<String>,
    /// Case-insensitive substring over location name, city and country.
    pub location: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub is_video: Option<bool>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_person_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.person_ids = ids.into_iter().collect();
        self
    }

    pub fn with_pet_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.pet_ids = ids.into_iter().collect();
        self
    }

    pub fn with_tag_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.tag_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_date_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_is_video(mut self, is_video: bool) -> Self {
        self.is_video = Some(is_video);
        self
    }

    /// True if no filter is set.
    pub fn is_empty(&self) -> bool {
        self.person_ids.is_empty()
            && self.pet_ids.is_empty()
            && self.tag_names.is_empty()
            && self.location.is_none()
            && self.country.is_none()
            && self.city.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.is_video.is_none()
    }
}

/// A named entity returned by suggestions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionEntry {
    pub id: i64,
    pub name: String,
}

/// Autocomplete suggestions, one independent list per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    pub people: Vec<SuggestionEntry>,
    pub pets: Vec<SuggestionEntry>,
    pub tags: Vec<SuggestionEntry>,
    pub cities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_status_transitions_are_one_directional() {
        use QueueStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            for next in [Pending, Processing, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_task_type_roundtrip_strings() {
        for t in [
            TaskType::Full,
            TaskType::Thumbnails,
            TaskType::Embeddings,
            TaskType::Faces,
            TaskType::Tags,
        ] {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
        }
        assert!("resize".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_full_task_runs_every_step_in_order() {
        assert_eq!(
            TaskType::Full.steps(),
            &[
                EnrichmentStep::Thumbnails,
                EnrichmentStep::Embeddings,
                EnrichmentStep::Faces,
                EnrichmentStep::Tags,
            ]
        );
        assert_eq!(TaskType::Faces.steps(), &[EnrichmentStep::Faces]);
        assert!(TaskType::Full.marks_processed());
        assert!(!TaskType::Tags.marks_processed());
    }

    #[test]
    fn test_bounding_box_from_pixels_normalizes_and_clamps() {
        let bbox = BoundingBox::from_pixels(50.0, 100.0, 100.0, 300.0, 200, 200);
        assert_eq!(bbox.x, 0.25);
        assert_eq!(bbox.y, 0.5);
        assert_eq!(bbox.width, 0.5);
        assert_eq!(bbox.height, 1.0);
    }

    #[test]
    fn test_new_photo_derives_file_name() {
        let photo = NewPhoto::new("/library/2024/beach.jpg");
        assert_eq!(photo.file_name, "beach.jpg");
        assert!(!photo.is_video);
        assert!(NewPhoto::new("clip.mp4").video().is_video);
    }

    #[test]
    fn test_search_criteria_is_empty() {
        assert!(SearchCriteria::new().is_empty());
        assert!(!SearchCriteria::new().with_person_ids([7]).is_empty());
        assert!(!SearchCriteria::new().with_is_video(false).is_empty());
    }

    #[test]
    fn test_face_vector_ids_are_unique() {
        assert_ne!(new_face_vector_id(), new_face_vector_id());
        assert_eq!(image_vector_id(12), "12");
    }
}
