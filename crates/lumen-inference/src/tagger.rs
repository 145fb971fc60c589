//! Zero-shot auto-tagging over the shared image/text embedding space.
//!
//! Each vocabulary label is embedded once as `"a photo of {label}"`; an
//! image's tags are the labels whose prompt embedding has the highest dot
//! product with the image embedding.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use lumen_core::defaults;
use lumen_core::similarity::dot;
use lumen_core::{EmbeddingBackend, Error, Result, TagPrediction, TagPredictor};

pub const SCENE_TAGS: &[&str] = &[
    "beach", "mountain", "forest", "city", "street", "indoor", "outdoor", "sunset", "sunrise",
    "night", "day", "cloudy", "sunny", "rainy", "snow", "desert", "lake", "river", "ocean", "park",
    "garden",
];

pub const OBJECT_TAGS: &[&str] = &[
    "car", "bicycle", "motorcycle", "airplane", "boat", "train", "food", "drink", "cake", "pizza",
    "coffee", "furniture", "chair", "table", "bed", "sofa", "desk", "electronics", "phone",
    "laptop", "television", "camera", "plant", "flower", "tree", "animal", "bird", "building",
    "house", "bridge", "tower", "book", "art", "painting", "sculpture",
];

pub const ACTIVITY_TAGS: &[&str] = &[
    "party", "celebration", "wedding", "birthday", "graduation", "travel", "vacation", "hiking",
    "swimming", "sports", "cooking", "eating", "drinking", "reading", "working", "selfie",
    "group photo", "portrait", "landscape",
];

pub const PET_TAGS: &[&str] = &["dog", "cat", "bird", "fish", "hamster", "rabbit", "turtle"];

/// Category name paired with its labels, in scoring order.
pub const VOCABULARY: &[(&str, &[&str])] = &[
    ("scene", SCENE_TAGS),
    ("object", OBJECT_TAGS),
    ("activity", ACTIVITY_TAGS),
    ("pet", PET_TAGS),
];

const CUSTOM_CATEGORY: &str = "custom";

struct LabelVector {
    category: &'static str,
    name: &'static str,
    vector: Vec<f32>,
}

fn prompt(label: &str) -> String {
    format!("{}{}", defaults::TAG_PROMPT_PREFIX, label)
}

/// Keep scores at or above `threshold`, highest first, truncated to `top_k`.
fn rank(mut predictions: Vec<TagPrediction>, threshold: f32, top_k: usize) -> Vec<TagPrediction> {
    predictions.retain(|p| p.confidence >= threshold);
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    predictions.truncate(top_k);
    predictions
}

/// Zero-shot tagger backed by an [`EmbeddingBackend`].
pub struct AutoTagger {
    embedder: Arc<dyn EmbeddingBackend>,
    labels: OnceCell<Vec<LabelVector>>,
}

impl AutoTagger {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            embedder,
            labels: OnceCell::new(),
        }
    }

    /// Vocabulary prompt embeddings, computed on first use.
    async fn labels(&self) -> Result<&[LabelVector]> {
        let labels = self
            .labels
            .get_or_try_init(|| async {
                let entries: Vec<(&'static str, &'static str)> = VOCABULARY
                    .iter()
                    .flat_map(|(category, tags)| tags.iter().map(move |tag| (*category, *tag)))
                    .collect();
                let prompts: Vec<String> = entries.iter().map(|(_, tag)| prompt(tag)).collect();
                let vectors = self.embedder.embed_texts(&prompts).await?;
                if vectors.len() != entries.len() {
                    return Err(Error::Embedding(format!(
                        "expected {} label embeddings, got {}",
                        entries.len(),
                        vectors.len()
                    )));
                }

                info!(
                    subsystem = "inference",
                    component = "tagger",
                    label_count = entries.len(),
                    "Precomputed tag embeddings"
                );
                Ok(entries
                    .into_iter()
                    .zip(vectors)
                    .map(|((category, name), vector)| LabelVector {
                        category,
                        name,
                        vector: vector.to_vec(),
                    })
                    .collect())
            })
            .await?;
        Ok(labels)
    }

    /// Score `image_embedding` against the vocabulary, optionally restricted to one category.
    async fn score(
        &self,
        image_embedding: &[f32],
        category: Option<&str>,
    ) -> Result<Vec<TagPrediction>> {
        Ok(self
            .labels()
            .await?
            .iter()
            .filter(|l| category.map_or(true, |c| l.category == c))
            .map(|l| TagPrediction {
                name: l.name.to_string(),
                category: l.category.to_string(),
                confidence: dot(image_embedding, &l.vector),
            })
            .collect())
    }

    /// Tags for an already computed, unit-length image embedding.
    pub async fn predict_for_embedding(
        &self,
        image_embedding: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<TagPrediction>> {
        let scored = self.score(image_embedding, None).await?;
        Ok(rank(scored, threshold, top_k))
    }

    /// Score caller-supplied labels. Results carry the `custom` category.
    pub async fn predict_custom(
        &self,
        image: &Path,
        labels: &[String],
        threshold: f32,
    ) -> Result<Vec<TagPrediction>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }
        let image_embedding = self.embedder.embed_image(image).await?;
        let prompts: Vec<String> = labels.iter().map(|l| prompt(l)).collect();
        let label_vectors = self.embedder.embed_texts(&prompts).await?;

        let predictions = labels
            .iter()
            .zip(label_vectors)
            .map(|(label, vector)| TagPrediction {
                name: label.clone(),
                category: CUSTOM_CATEGORY.to_string(),
                confidence: dot(image_embedding.as_slice(), vector.as_slice()),
            })
            .collect();
        Ok(rank(predictions, threshold, labels.len()))
    }

    /// Pet labels only.
    pub async fn detect_pets(&self, image: &Path, threshold: f32) -> Result<Vec<TagPrediction>> {
        let image_embedding = self.embedder.embed_image(image).await?;
        let scored = self.score(image_embedding.as_slice(), Some("pet")).await?;
        Ok(rank(scored, threshold, PET_TAGS.len()))
    }
}

#[async_trait]
impl TagPredictor for AutoTagger {
    async fn predict_tags(
        &self,
        image: &Path,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<TagPrediction>> {
        let image_embedding = self.embedder.embed_image(image).await?;
        let predictions = self
            .predict_for_embedding(image_embedding.as_slice(), threshold, top_k)
            .await?;
        debug!(
            subsystem = "inference",
            component = "tagger",
            result_count = predictions.len(),
            "Tag prediction complete"
        );
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVisionBackend;

    // High enough that unmapped hash vectors stay far below any threshold used here.
    const DIM: usize = 512;

    fn unit(axis: usize, dim: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_vocabulary_size() {
        let total: usize = VOCABULARY.iter().map(|(_, tags)| tags.len()).sum();
        assert_eq!(total, 21 + 35 + 19 + 7);
    }

    #[test]
    fn test_rank_filters_sorts_and_truncates() {
        let p = |name: &str, confidence: f32| TagPrediction {
            name: name.into(),
            category: "scene".into(),
            confidence,
        };
        let ranked = rank(
            vec![p("a", 0.1), p("b", 0.5), p("c", 0.3), p("d", 0.2)],
            0.2,
            2,
        );
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_predict_tags_matches_aligned_label() {
        let backend = Arc::new(
            MockVisionBackend::new()
                .with_dimension(DIM)
                .with_text_embedding("a photo of beach", unit(0, DIM))
                .with_text_embedding("a photo of sunset", unit(1, DIM))
                .with_image_embedding("beach.jpg", unit(0, DIM)),
        );
        let tagger = AutoTagger::new(backend.clone());

        let tags = tagger
            .predict_tags(Path::new("/photos/beach.jpg"), 0.9, 8)
            .await
            .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "beach");
        assert_eq!(tags[0].category, "scene");

        // Vocabulary is embedded once.
        tagger
            .predict_tags(Path::new("/photos/beach.jpg"), 0.9, 8)
            .await
            .unwrap();
        assert_eq!(backend.text_batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_detect_pets_only_scores_pet_labels() {
        let dog = unit(2, DIM);
        let backend = Arc::new(
            MockVisionBackend::new()
                .with_dimension(DIM)
                .with_text_embedding("a photo of dog", dog.clone())
                .with_text_embedding("a photo of park", dog.clone())
                .with_image_embedding("rex.jpg", dog),
        );
        let tagger = AutoTagger::new(backend);

        let pets = tagger
            .detect_pets(Path::new("rex.jpg"), defaults::PET_THRESHOLD)
            .await
            .unwrap();
        assert_eq!(pets.len(), 1);
        assert_eq!(pets[0].name, "dog");
        assert_eq!(pets[0].category, "pet");
    }

    #[tokio::test]
    async fn test_predict_custom_uses_custom_category() {
        let backend = Arc::new(
            MockVisionBackend::new()
                .with_dimension(DIM)
                .with_text_embedding("a photo of lighthouse", unit(5, DIM))
                .with_image_embedding("coast.jpg", unit(5, DIM)),
        );
        let tagger = AutoTagger::new(backend);

        let tags = tagger
            .predict_custom(
                Path::new("coast.jpg"),
                &["lighthouse".to_string(), "volcano".to_string()],
                0.5,
            )
            .await
            .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "lighthouse");
        assert_eq!(tags[0].category, "custom");
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let backend = Arc::new(MockVisionBackend::new().with_dimension(DIM).failing_embeddings());
        let tagger = AutoTagger::new(backend);
        let err = tagger
            .predict_tags(Path::new("x.jpg"), 0.1, 8)
            .await
            .unwrap_err();
        assert!(err.is_external());
    }
}
