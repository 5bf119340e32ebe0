//! Embedding providers.
//!
//! Text and images are embedded into one joint space so that text queries
//! can be compared against catalog images:
//! - `EmbeddingProvider`: the narrow interface the pipeline consumes
//! - `FastembedProvider`: CLIP-style text + vision models via fastembed
//!
//! Every returned vector is L2-normalized.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding};

use crate::semantic::index::normalize;

/// Default joint text/image model.
pub const DEFAULT_MODEL: &str = "clip-vit-b-32";

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Source of unit-length text and image embeddings.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model, used in cache keys.
    fn model_id(&self) -> &str;

    /// Embed several texts in one call.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed an encoded image (PNG, JPEG, ...).
    fn embed_image(&self, encoded: &[u8]) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed image files, positionally aligned with `paths`.
    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_texts(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

/// Normalize every vector a model returned.
fn normalized(vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    vectors
        .into_iter()
        .map(|v| normalize(v).map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string())))
        .collect()
}

/// fastembed-backed provider pairing a text model with a vision model.
/// Uses Mutexes because fastembed's embed() requires &mut self.
pub struct FastembedProvider {
    text: Mutex<TextEmbedding>,
    image: Mutex<ImageEmbedding>,
    model_name: String,
    batch_size: usize,
}

impl FastembedProvider {
    /// Load (downloading on first use) the text and vision halves of a model.
    ///
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: &Path, batch_size: usize) -> Result<Self, EmbeddingError> {
        let (text_model, image_model) = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!("Loading embedding model '{model_name}'");

        let text = TextEmbedding::try_new(
            InitOptions::new(text_model)
                .with_cache_dir(models_dir.clone())
                .with_show_download_progress(true),
        )
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let image = ImageEmbedding::try_new(
            ImageInitOptions::new(image_model)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true),
        )
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            text: Mutex::new(text),
            image: Mutex::new(image),
            model_name: model_name.to_string(),
            batch_size: batch_size.max(1),
        })
    }

    /// Parse model name string to the fastembed text/vision pair.
    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, ImageEmbeddingModel), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok((
                fastembed::EmbeddingModel::ClipVitB32,
                ImageEmbeddingModel::ClipVitB32,
            )),
            "nomic-embed-v1.5" | "nomicembedv15" => Ok((
                fastembed::EmbeddingModel::NomicEmbedTextV15,
                ImageEmbeddingModel::NomicEmbedVisionV15,
            )),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32, nomic-embed-v1.5",
                name
            ))),
        }
    }
}

impl EmbeddingProvider for FastembedProvider {
    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.text.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let vectors = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        normalized(vectors)
    }

    fn embed_image(&self, encoded: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.image.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let vectors = model
            .embed_bytes(&[encoded], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        normalized(vectors)?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if paths.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.image.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let mut vectors = Vec::with_capacity(paths.len());
        for (batch_no, batch) in paths.chunks(self.batch_size).enumerate() {
            let embedded = model
                .embed(batch.to_vec(), Some(self.batch_size))
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            vectors.extend(normalized(embedded)?);

            if batch_no % 25 == 0 {
                log::info!("Embedded {}/{} images", vectors.len(), paths.len());
            }
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require model download - run with --ignored
    #[test]
    #[ignore = "requires model download"]
    fn test_model_creation_and_text_embedding() {
        let temp_dir = tempfile::tempdir().unwrap();
        let provider = FastembedProvider::new(DEFAULT_MODEL, temp_dir.path(), 8).unwrap();
        assert_eq!(provider.model_id(), DEFAULT_MODEL);

        let embedding = provider.embed_text("a plain gold ring").unwrap();
        assert_eq!(embedding.len(), 512);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_invalid_model_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = FastembedProvider::new("nonexistent-model", temp_dir.path(), 8);
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    fn test_parse_model_name_is_case_insensitive() {
        assert!(FastembedProvider::parse_model_name("CLIP-ViT-B-32").is_ok());
        assert!(FastembedProvider::parse_model_name("nomic-embed-v1.5").is_ok());
    }
}
