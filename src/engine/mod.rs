//! The search engine context.
//!
//! `SearchEngine` owns everything a request needs: the scanned catalog, the
//! vector index built from it, the text retrieval pipeline and the image
//! orchestrator. It is built once at startup, shared behind an `Arc` and never
//! mutated afterwards, so requests can run in parallel without locking.

mod classifier;
mod errors;
mod orchestrator;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use rand::seq::index::sample;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::config::{Config, SearchConfig};
use crate::images;
use crate::semantic::{
    EmbeddingCache, EmbeddingError, EmbeddingProvider, FastembedProvider, IndexedItem,
    ItemPayload, QueryAnalyzer, ResultItem, RetrievalPipeline, SearchRequest, SearchResponse,
    VectorIndex, MAX_TOP_K,
};
use crate::vision::{self, Vision};

pub use classifier::TypeClassifier;
pub use errors::EngineError;
pub use orchestrator::ImageQueryOrchestrator;

const MAX_FEATURED: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetails {
    pub id: u64,
    pub path: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub categories: Vec<String>,
    pub total_images: usize,
    pub category_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub indexed_images: usize,
    pub categories: Vec<String>,
    pub model: String,
    pub vision_enabled: bool,
}

fn check_top_k(top_k: usize) -> Result<(), EngineError> {
    if (1..=MAX_TOP_K).contains(&top_k) {
        Ok(())
    } else {
        Err(EngineError::InvalidRequest(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {top_k}"
        )))
    }
}

/// Decode an upload, rejecting anything that is not an image.
fn decode_upload(data: &[u8]) -> Result<DynamicImage, EngineError> {
    if !images::is_image(data) {
        return Err(EngineError::InvalidRequest(
            "uploaded file is not an image".into(),
        ));
    }
    images::decode(data).map_err(|e| EngineError::InvalidRequest(format!("{e:#}")))
}

/// Embed every catalog image, reusing cached embeddings when the catalog and
/// model are unchanged.
pub fn build_index(
    catalog: &Catalog,
    embedder: &dyn EmbeddingProvider,
    cache: &EmbeddingCache,
    dimensions: usize,
) -> Result<VectorIndex, EngineError> {
    if catalog.is_empty() {
        log::warn!("catalog at {} is empty", catalog.root().display());
        return Ok(VectorIndex::new(dimensions));
    }

    let sources = catalog.sources();
    let key = EmbeddingCache::key(embedder.model_id(), &sources);

    // Cache entries are kept in sorted source order, like the key.
    let mut sorted_order: Vec<usize> = (0..sources.len()).collect();
    sorted_order.sort_by(|&a, &b| sources[a].cmp(&sources[b]));

    let vectors = match cache.get(&key, sources.len()) {
        Some(cached) => {
            log::info!("loaded {} cached embeddings", cached.len());
            let mut vectors = vec![Vec::new(); cached.len()];
            for (&idx, vector) in sorted_order.iter().zip(cached) {
                vectors[idx] = vector;
            }
            vectors
        }
        None => {
            log::info!("embedding {} catalog images", sources.len());
            let paths: Vec<PathBuf> = catalog
                .items()
                .iter()
                .map(|item| catalog.file_path(item))
                .collect();

            let vectors = embedder.embed_image_files(&paths)?;
            if vectors.len() != paths.len() {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "expected {} image embeddings, got {}",
                    paths.len(),
                    vectors.len()
                ))
                .into());
            }

            let sorted: Vec<Vec<f32>> = sorted_order
                .iter()
                .map(|&idx| vectors[idx].clone())
                .collect();
            cache.put(&key, &sorted);
            vectors
        }
    };

    let dimensions = vectors.first().map(Vec::len).unwrap_or(dimensions);
    let mut index = VectorIndex::with_capacity(dimensions, vectors.len());
    index.upsert(
        catalog
            .items()
            .iter()
            .zip(vectors)
            .map(|(item, vector)| IndexedItem {
                id: item.id,
                vector,
                payload: ItemPayload {
                    category: item.category.clone(),
                    path: item.path.clone(),
                },
            })
            .collect(),
    )?;

    log::info!("indexed {} images", index.len());
    Ok(index)
}

pub struct SearchEngine {
    search_config: SearchConfig,
    categories: Vec<String>,
    catalog: Catalog,
    index: Arc<VectorIndex>,
    model: String,
    vision: Arc<dyn Vision>,
    pipeline: RetrievalPipeline,
    orchestrator: ImageQueryOrchestrator,
}

impl SearchEngine {
    /// Build with the fastembed provider and the configured vision service.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let embedder = FastembedProvider::new(
            &config.embedding.model,
            &config.cache_dir(),
            config.embedding.batch_size,
        )?;
        let vision = vision::from_config(&config.vision);

        Self::build(config, Arc::new(embedder), vision)
    }

    pub fn build(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        vision: Arc<dyn Vision>,
    ) -> Result<Self, EngineError> {
        let catalog = Catalog::scan(&config.catalog_path(), &config.categories)?;
        let classifier = TypeClassifier::new(
            embedder.as_ref(),
            &config.categories,
            config.search.type_confidence,
        )?;

        let cache = EmbeddingCache::new(config.cache_dir());
        let index = Arc::new(build_index(
            &catalog,
            embedder.as_ref(),
            &cache,
            classifier.dimensions().unwrap_or_default(),
        )?);

        let pipeline = RetrievalPipeline::new(
            embedder.clone(),
            index.clone(),
            QueryAnalyzer::new(config.categories.clone()),
        );
        let orchestrator = ImageQueryOrchestrator::new(
            embedder.clone(),
            index.clone(),
            vision.clone(),
            classifier,
            config.search.hybrid_weights(),
        );

        Ok(Self {
            search_config: config.search.clone(),
            categories: config.categories.clone(),
            catalog,
            index,
            model: embedder.model_id().to_string(),
            vision,
            pipeline,
            orchestrator,
        })
    }

    /// A text request for `query` with the configured defaults.
    pub fn request(&self, query: impl Into<String>) -> SearchRequest {
        SearchRequest::new(query, &self.search_config)
    }

    pub fn default_top_k(&self) -> usize {
        self.search_config.default_top_k
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        Ok(self.pipeline.search(request)?)
    }

    pub fn search_by_image(
        &self,
        data: &[u8],
        top_k: Option<usize>,
    ) -> Result<SearchResponse, EngineError> {
        let top_k = top_k.unwrap_or(self.search_config.default_top_k);
        check_top_k(top_k)?;
        let image = decode_upload(data)?;

        self.orchestrator.search_by_image(&image, top_k)
    }

    pub fn search_by_image_and_text(
        &self,
        data: &[u8],
        text: &str,
        top_k: Option<usize>,
    ) -> Result<SearchResponse, EngineError> {
        let top_k = top_k.unwrap_or(self.search_config.default_top_k);
        check_top_k(top_k)?;
        if text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("query must not be empty".into()));
        }
        let image = decode_upload(data)?;

        self.orchestrator
            .search_by_image_and_text(&image, text.trim(), top_k)
    }

    pub fn recommend(&self, id: u64, top_k: Option<usize>) -> Result<SearchResponse, EngineError> {
        let top_k = top_k.unwrap_or(self.search_config.default_top_k);
        check_top_k(top_k)?;

        self.orchestrator.recommend(id, top_k)
    }

    /// Item details with a generated description.
    pub fn product(&self, id: u64) -> Result<ProductDetails, EngineError> {
        let item = self
            .catalog
            .get(id)
            .ok_or_else(|| EngineError::InvalidArgument(format!("Product {id} not found")))?;

        let description = match std::fs::read(self.catalog.file_path(item))
            .map_err(anyhow::Error::from)
            .and_then(|data| images::decode(&data))
        {
            Ok(image) => vision::describe_or_fallback(self.vision.as_ref(), &image, &item.category),
            Err(e) => {
                log::warn!("could not load image for product {id}: {e:#}");
                vision::fallback_description(&item.category)
            }
        };

        Ok(ProductDetails {
            id: item.id,
            path: item.path.clone(),
            category: item.category.clone(),
            description,
        })
    }

    /// Location of an item's image on disk.
    pub fn image_path(&self, id: u64) -> Result<PathBuf, EngineError> {
        self.catalog
            .get(id)
            .map(|item| self.catalog.file_path(item))
            .ok_or_else(|| EngineError::InvalidArgument(format!("Image {id} not found")))
    }

    pub fn categories(&self) -> CategorySummary {
        CategorySummary {
            categories: self.categories.clone(),
            total_images: self.catalog.len(),
            category_counts: self.catalog.category_counts(),
        }
    }

    /// A random sample of catalog items.
    pub fn featured(&self, limit: usize) -> SearchResponse {
        let amount = limit.clamp(1, MAX_FEATURED).min(self.catalog.len());
        let items = self.catalog.items();

        let results = sample(&mut rand::rng(), items.len(), amount)
            .into_iter()
            .map(|idx| {
                let item = &items[idx];
                ResultItem {
                    id: item.id,
                    path: item.path.clone(),
                    category: item.category.clone(),
                    similarity_score: 1.0,
                    plain_score: None,
                    decoration_score: None,
                }
            })
            .collect();

        SearchResponse::unfiltered("Featured products", "Featured products", results)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            indexed_images: self.index.len(),
            categories: self.categories.clone(),
            model: self.model.clone(),
            vision_enabled: self.vision.is_enabled(),
        }
    }
}
