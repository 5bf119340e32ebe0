//! Image-driven searches: uploads with or without text, and recommendations.
//!
//! For an upload, text read off the image (an engraving, a price tag, a
//! handwritten note) is treated as a stronger signal than looks alone: when
//! there is any, the search becomes a hybrid image + text query. Otherwise
//! it is a pure image similarity search, limited to the detected item type
//! when detection is confident.

use std::sync::Arc;

use image::DynamicImage;

use super::classifier::{TypeClassifier, TypeDetection};
use super::EngineError;
use crate::images;
use crate::semantic::hybrid::{self, HybridWeights};
use crate::semantic::{
    EmbeddingProvider, FilterStats, ResultItem, SearchParams, SearchResponse, VectorIndex,
};
use crate::vision::Vision;

pub struct ImageQueryOrchestrator {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    vision: Arc<dyn Vision>,
    classifier: TypeClassifier,
    weights: HybridWeights,
}

impl ImageQueryOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        vision: Arc<dyn Vision>,
        classifier: TypeClassifier,
        weights: HybridWeights,
    ) -> Self {
        Self {
            embedder,
            index,
            vision,
            classifier,
            weights,
        }
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>, EngineError> {
        let png = images::encode_png(image)?;
        Ok(self.embedder.embed_image(&png)?)
    }

    /// Text visible on the image; any failure counts as no text.
    fn read_text(&self, image: &DynamicImage) -> String {
        match self.vision.extract_text(image) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                log::warn!("text extraction failed, continuing without text: {e}");
                String::new()
            }
        }
    }

    /// Item type of the upload.
    ///
    /// With vision enabled, sideways landscape shots are rotated first and
    /// embedded separately for detection.
    fn detect_type(
        &self,
        image: &DynamicImage,
        image_vector: &[f32],
    ) -> Result<Option<TypeDetection>, EngineError> {
        if self.vision.is_enabled() {
            let rotated = images::rotate_for_detection(image);
            if rotated.width() != image.width() {
                let rotated_vector = self.embed_image(&rotated)?;
                return Ok(self.classifier.detect(&rotated_vector));
            }
        }

        Ok(self.classifier.detect(image_vector))
    }

    /// Search with an uploaded image, switching to a hybrid query when the
    /// image carries text.
    pub fn search_by_image(
        &self,
        image: &DynamicImage,
        top_k: usize,
    ) -> Result<SearchResponse, EngineError> {
        let extracted = self.read_text(image);
        let image_vector = self.embed_image(image)?;
        let detected = self.detect_type(image, &image_vector)?.map(|d| d.category);

        if !extracted.is_empty() {
            let composite = match &detected {
                Some(category) => format!("{category} {extracted}"),
                None => extracted,
            };
            log::info!("image carries text, searching with {composite:?}");
            return self.hybrid_search(&image_vector, &composite, top_k);
        }

        let hits = self.index.search(
            &image_vector,
            &SearchParams::new(top_k).in_category(detected.clone()),
        )?;

        let enhanced = match &detected {
            Some(category) => format!("Image search (detected: {category})"),
            None => "Image search".to_string(),
        };

        Ok(SearchResponse::unfiltered(
            "Image upload search",
            enhanced,
            hits.into_iter().map(ResultItem::from).collect(),
        ))
    }

    /// Search with an uploaded image refined by user-supplied text.
    pub fn search_by_image_and_text(
        &self,
        image: &DynamicImage,
        text: &str,
        top_k: usize,
    ) -> Result<SearchResponse, EngineError> {
        let image_vector = self.embed_image(image)?;
        self.hybrid_search(&image_vector, text, top_k)
    }

    fn hybrid_search(
        &self,
        image_vector: &[f32],
        text: &str,
        top_k: usize,
    ) -> Result<SearchResponse, EngineError> {
        let text_vector = self.embedder.embed_text(text)?;
        let query = hybrid::combine(image_vector, &text_vector, self.weights)?;
        let hits = self.index.search(&query, &SearchParams::new(top_k))?;

        Ok(SearchResponse::unfiltered(
            text,
            format!("Image + Text: {text}"),
            hits.into_iter().map(ResultItem::from).collect(),
        ))
    }

    /// Items most similar to an indexed item, excluding the item itself.
    pub fn recommend(&self, id: u64, top_k: usize) -> Result<SearchResponse, EngineError> {
        let item = self
            .index
            .get(id)
            .ok_or_else(|| EngineError::InvalidArgument(format!("Invalid image_id: {id}")))?;

        let hits = self
            .index
            .search(&item.vector, &SearchParams::new(top_k + 1))?;
        let matches = hits.len();

        let results: Vec<ResultItem> = hits
            .into_iter()
            .filter(|hit| hit.id != id)
            .take(top_k)
            .map(ResultItem::from)
            .collect();

        Ok(SearchResponse {
            query: format!("Similar to image {id}"),
            enhanced_query: format!("Recommendations for {}", item.payload.category),
            categories: vec![item.payload.category.clone()],
            negations: vec![],
            total_results: results.len(),
            filter_stats: FilterStats {
                semantic_matches: matches,
                category_filtered: matches,
                negation_filtered: matches,
                final_results: results.len(),
            },
            results,
        })
    }
}
