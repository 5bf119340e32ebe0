//! Zero-shot item type detection against one short phrase per category.

use crate::semantic::index::dot;
use crate::semantic::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDetection {
    pub category: String,
    pub confidence: f32,
}

pub struct TypeClassifier {
    labels: Vec<(String, Vec<f32>)>,
    threshold: f32,
}

impl TypeClassifier {
    /// Embed "a {category}" for every category, in one provider call.
    pub fn new(
        embedder: &dyn EmbeddingProvider,
        categories: &[String],
        threshold: f32,
    ) -> Result<Self, EmbeddingError> {
        let phrases: Vec<String> = categories.iter().map(|c| format!("a {c}")).collect();
        let vectors = embedder.embed_texts(&phrases)?;

        if vectors.len() != categories.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} label embeddings, got {}",
                categories.len(),
                vectors.len()
            )));
        }

        Ok(Self {
            labels: categories.iter().cloned().zip(vectors).collect(),
            threshold,
        })
    }

    /// Embedding size of the label vectors, if there are any.
    pub fn dimensions(&self) -> Option<usize> {
        self.labels.first().map(|(_, v)| v.len())
    }

    /// Best matching category, if its score is strictly above the threshold.
    pub fn detect(&self, image_vector: &[f32]) -> Option<TypeDetection> {
        let (category, confidence) = self
            .labels
            .iter()
            .map(|(category, label)| (category, dot(image_vector, label)))
            .fold(None::<(&String, f32)>, |best, (category, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((category, score)),
            })?;

        if confidence > self.threshold {
            log::info!("detected item type {category} (confidence {confidence:.2})");
            Some(TypeDetection {
                category: category.clone(),
                confidence,
            })
        } else {
            log::debug!("no confident item type (best {category} at {confidence:.2})");
            None
        }
    }
}
