//! Deterministic stand-ins for the embedding model and vision service.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};

use crate::config::Config;
use crate::engine::SearchEngine;
use crate::images;
use crate::semantic::index::normalize;
use crate::semantic::{EmbeddingError, EmbeddingProvider};
use crate::vision::{Vision, VisionError};

/// Embeds texts by exact lookup and images by the color of their top-left
/// pixel. Anything unknown maps to the last basis vector.
pub struct FakeEmbedder {
    dims: usize,
    texts: HashMap<String, Vec<f32>>,
    colors: HashMap<[u8; 3], Vec<f32>>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
    file_calls: AtomicUsize,
    files_embedded: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            texts: HashMap::new(),
            colors: HashMap::new(),
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            file_calls: AtomicUsize::new(0),
            files_embedded: AtomicUsize::new(0),
        }
    }

    pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dims);
        self.texts.insert(text.to_string(), vector);
        self
    }

    pub fn with_texts<I>(mut self, texts: I, vector: Vec<f32>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        assert_eq!(vector.len(), self.dims);
        for text in texts {
            self.texts.insert(text.into(), vector.clone());
        }
        self
    }

    pub fn with_color(mut self, color: [u8; 3], vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dims);
        self.colors.insert(color, vector);
        self
    }

    /// Calls to `embed_texts` (and therefore `embed_text`).
    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    /// Calls to `embed_image`.
    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    /// Calls to `embed_image_files`.
    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    /// Images embedded through `embed_image_files`.
    pub fn files_embedded(&self) -> usize {
        self.files_embedded.load(Ordering::SeqCst)
    }

    fn fallback(&self) -> Vec<f32> {
        let mut v = vec![0.0; self.dims];
        v[self.dims - 1] = 1.0;
        v
    }

    fn unit(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        normalize(vector).map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }

    fn for_image(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbeddingError> {
        let pixel = image.to_rgb8().get_pixel(0, 0).0;
        self.unit(self.colors.get(&pixel).cloned().unwrap_or_else(|| self.fallback()))
    }
}

impl EmbeddingProvider for FakeEmbedder {
    fn model_id(&self) -> &str {
        "fake-clip"
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|t| self.unit(self.texts.get(t).cloned().unwrap_or_else(|| self.fallback())))
            .collect()
    }

    fn embed_image(&self, encoded: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let image = image::load_from_memory(encoded)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
        self.for_image(&image)
    }

    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.files_embedded.fetch_add(paths.len(), Ordering::SeqCst);
        paths
            .iter()
            .map(|path| {
                let image =
                    image::open(path).map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
                self.for_image(&image)
            })
            .collect()
    }
}

/// Vision service with canned answers.
pub struct StaticVision {
    pub text: String,
    pub description: String,
}

impl StaticVision {
    pub fn reading(text: &str) -> Self {
        Self {
            text: text.to_string(),
            description: "A polished band.".to_string(),
        }
    }
}

impl Vision for StaticVision {
    fn is_enabled(&self) -> bool {
        true
    }

    fn extract_text(&self, _image: &DynamicImage) -> Result<String, VisionError> {
        Ok(self.text.clone())
    }

    fn describe(&self, _image: &DynamicImage, _category: &str) -> Result<String, VisionError> {
        Ok(self.description.clone())
    }
}

/// Vision service that is configured but always fails.
pub struct FailingVision;

impl Vision for FailingVision {
    fn is_enabled(&self) -> bool {
        true
    }

    fn extract_text(&self, _image: &DynamicImage) -> Result<String, VisionError> {
        Err(VisionError::Api {
            status: 503,
            body: "overloaded".into(),
        })
    }

    fn describe(&self, _image: &DynamicImage, _category: &str) -> Result<String, VisionError> {
        Err(VisionError::EmptyResponse)
    }
}

pub fn solid(color: [u8; 3], width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

/// PNG bytes of a solid 4x4 image.
pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    images::encode_png(&solid(color, 4, 4)).unwrap()
}

pub fn write_png(path: &Path, color: [u8; 3]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    solid(color, 4, 4).save(path).unwrap();
}

/// Config rooted in `base` with catalog images written for each
/// `(relative path, color)`.
pub fn catalog_fixture(base: &Path, files: &[(&str, [u8; 3])]) -> Config {
    let config = Config::for_tests(base);
    for (rel, color) in files {
        write_png(&config.catalog_path().join(rel), *color);
    }
    config
}

pub const RING_A: [u8; 3] = [200, 0, 0];
pub const RING_B: [u8; 3] = [0, 200, 0];
pub const NECKLACE_C: [u8; 3] = [0, 0, 200];
/// Upload that looks like a ring
pub const UPLOAD_RING: [u8; 3] = [10, 10, 10];
/// Upload that looks like nothing in particular
pub const UPLOAD_VAGUE: [u8; 3] = [20, 20, 20];

/// Embedder for a three item catalog.
///
/// Axes: 0 = ring, 1 = necklace, 2 = engraved text "love", 3 = unknown.
pub fn jewelry_embedder() -> FakeEmbedder {
    FakeEmbedder::new(4)
        .with_text("a ring", vec![1.0, 0.0, 0.0, 0.0])
        .with_text("a necklace", vec![0.0, 1.0, 0.0, 0.0])
        .with_text("love", vec![0.0, 0.0, 1.0, 0.0])
        .with_text("ring love", vec![0.0, 0.0, 1.0, 0.0])
        .with_color(RING_A, vec![0.8, 0.0, 0.6, 0.0])
        .with_color(RING_B, vec![1.0, 0.0, 0.0, 0.0])
        .with_color(NECKLACE_C, vec![0.2, 0.9, 0.4, 0.0])
        .with_color(UPLOAD_RING, vec![0.7, 0.6, 0.0, 0.0])
        .with_color(UPLOAD_VAGUE, vec![0.2, 0.2, 0.0, 0.96])
}

/// Catalog: 0 = ring/a.png, 1 = ring/b.png, 2 = necklace/c.png
pub fn jewelry_config(base: &Path) -> Config {
    catalog_fixture(
        base,
        &[
            ("ring/a.png", RING_A),
            ("ring/b.png", RING_B),
            ("necklace/c.png", NECKLACE_C),
        ],
    )
}

pub fn jewelry_engine(vision: Arc<dyn Vision>) -> (SearchEngine, Arc<FakeEmbedder>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = jewelry_config(dir.path());
    let embedder = Arc::new(jewelry_embedder());
    let engine = SearchEngine::build(&config, embedder.clone(), vision).unwrap();
    (engine, embedder, dir)
}
