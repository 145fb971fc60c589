//! Per-photo enrichment steps.
//!
//! Every step writes its results into a [`PhotoProcessingUpdate`] that the
//! scheduler commits together with the queue item's terminal transition.
//! Failures of external calls (models, ffmpeg, the vector index) turn into a
//! negative step result; relational-store errors propagate and fail the item.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use lumen_core::{
    image_vector_id, new_face_vector_id, Capabilities, Collection, EnrichmentStep, Library,
    NewFace, Photo, PhotoProcessingUpdate, Result, TaggerConfig, VectorMetadata,
};

use crate::identity::FaceIdentityResolver;
use crate::thumbnails::ThumbnailGenerator;

/// Runs enrichment steps against one photo at a time.
pub struct Enricher {
    library: Library,
    capabilities: Capabilities,
    thumbnails: ThumbnailGenerator,
    resolver: FaceIdentityResolver,
    tagging: TaggerConfig,
}

impl Enricher {
    pub fn new(
        library: Library,
        capabilities: Capabilities,
        thumbnails: ThumbnailGenerator,
        resolver: FaceIdentityResolver,
        tagging: TaggerConfig,
    ) -> Self {
        Self {
            library,
            capabilities,
            thumbnails,
            resolver,
            tagging,
        }
    }

    pub fn resolver(&self) -> &FaceIdentityResolver {
        &self.resolver
    }

    /// Run one step. `Ok(false)` means the step produced nothing: the input was
    /// unsuitable or an external call failed.
    #[instrument(
        skip(self, photo, update),
        fields(subsystem = "jobs", component = "enricher", photo_id = photo.id, step = %step)
    )]
    pub async fn run_step(
        &self,
        step: EnrichmentStep,
        photo: &Photo,
        update: &mut PhotoProcessingUpdate,
    ) -> Result<bool> {
        let start = Instant::now();
        let result = match step {
            EnrichmentStep::Thumbnails => self.thumbnails.generate(photo, update).await,
            EnrichmentStep::Embeddings => self.embeddings(photo, update).await,
            EnrichmentStep::Faces => self.faces(photo, update).await,
            EnrichmentStep::Tags => self.tags(photo).await,
        };

        match result {
            Ok(done) => {
                debug!(
                    success = done,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Step finished"
                );
                Ok(done)
            }
            Err(e) if e.is_external() => {
                warn!(error = %e, "Step failed, continuing");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Store the photo's image embedding in the image collection.
    async fn embeddings(&self, photo: &Photo, update: &mut PhotoProcessingUpdate) -> Result<bool> {
        let Some(path) = still_image(photo) else {
            return Ok(false);
        };

        let embedding = self.capabilities.embedder.embed_image(path).await?;
        self.library
            .vectors
            .upsert(
                Collection::Image,
                &image_vector_id(photo.id),
                &embedding,
                VectorMetadata::image(photo.id),
            )
            .await?;
        update.has_embeddings = true;
        Ok(true)
    }

    /// Detect faces, index each one and assign it to a person.
    async fn faces(&self, photo: &Photo, update: &mut PhotoProcessingUpdate) -> Result<bool> {
        let Some(path) = still_image(photo) else {
            return Ok(false);
        };

        let detections = self.capabilities.face_detector.detect(path).await?;
        for detection in &detections {
            let mut face = self
                .library
                .faces
                .insert(NewFace::from_detection(photo.id, detection))
                .await?;

            let vector_id = new_face_vector_id();
            match self
                .library
                .vectors
                .upsert(
                    Collection::Face,
                    &vector_id,
                    &detection.embedding,
                    VectorMetadata::face(photo.id, face.id),
                )
                .await
            {
                Ok(()) => {
                    self.library
                        .faces
                        .set_embedding_id(face.id, &vector_id)
                        .await?;
                    face.embedding_id = Some(vector_id);
                }
                Err(e) if e.is_external() => {
                    warn!(face_id = face.id, error = %e, "Face vector insert failed, face stays unindexed");
                }
                Err(e) => return Err(e),
            }

            self.resolver.resolve(&face, &detection.embedding).await?;
        }

        update.has_faces_processed = true;
        debug!(face_count = detections.len(), "Faces processed");
        Ok(true)
    }

    /// Attach zero-shot tags to the photo.
    async fn tags(&self, photo: &Photo) -> Result<bool> {
        let Some(path) = still_image(photo) else {
            return Ok(false);
        };

        let predictions = self
            .capabilities
            .tagger
            .predict_tags(path, self.tagging.threshold, self.tagging.top_k)
            .await?;
        for prediction in &predictions {
            let tag = self
                .library
                .tags
                .get_or_create(&prediction.name, Some(&prediction.category))
                .await?;
            self.library.tags.link_photo(photo.id, tag.id).await?;
        }
        debug!(result_count = predictions.len(), "Tags attached");
        Ok(true)
    }
}

/// Source path of a still image that exists on disk.
fn still_image(photo: &Photo) -> Option<&Path> {
    let path = Path::new(&photo.file_path);
    if photo.is_video || !path.exists() {
        return None;
    }
    Some(path)
}
