//! Three-stage filtered retrieval for text queries.
//!
//! 1. Semantic retrieval: one nearest-neighbor query for `semantic_top_k`
//!    candidates, with their stored vectors.
//! 2. Category filter: keep candidates in the resolved category set.
//! 3. Decoration filter (only when the query negates something): score each
//!    candidate against decoration and plain probe phrases, keep the plain
//!    ones and re-rank them by plainness.
//!
//! The candidate list only ever shrinks; `FilterStats` records its size after
//! each stage.

use std::sync::Arc;

use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{max_similarity, SearchHit, SearchParams, VectorIndex};
use crate::semantic::query::{QueryAnalysis, QueryAnalyzer};
use crate::semantic::response::{FilterStats, ResultItem, SearchRequest, SearchResponse};
use crate::semantic::SearchError;

/// Embedded probe phrases for one request.
struct ProbeSet {
    decoration: Vec<Vec<f32>>,
    plain: Vec<Vec<f32>>,
}

/// A candidate moving through the stages.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub hit: SearchHit,
    pub plain_score: Option<f32>,
    pub decoration_score: Option<f32>,
}

impl From<SearchHit> for RetrievalCandidate {
    fn from(hit: SearchHit) -> Self {
        Self {
            hit,
            plain_score: None,
            decoration_score: None,
        }
    }
}

impl From<RetrievalCandidate> for ResultItem {
    fn from(candidate: RetrievalCandidate) -> Self {
        Self {
            plain_score: candidate.plain_score,
            decoration_score: candidate.decoration_score,
            ..ResultItem::from(candidate.hit)
        }
    }
}

pub struct RetrievalPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    analyzer: QueryAnalyzer,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        analyzer: QueryAnalyzer,
    ) -> Self {
        Self {
            embedder,
            index,
            analyzer,
        }
    }

    /// Run a text search through all three stages.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        request.validate()?;

        let analysis = self
            .analyzer
            .analyze(&request.query, request.categories.as_deref());

        log::debug!(
            "query={:?} enhanced={:?} categories={:?} negations={:?}",
            request.query,
            analysis.enhanced_text,
            analysis.categories,
            analysis.negations
        );

        let query_vector = self.embedder.embed_text(&analysis.enhanced_text)?;
        let probes = if analysis.has_negations() {
            Some(self.embed_probes(&analysis)?)
        } else {
            None
        };

        // Stage 1
        let hits = self.index.search(
            &query_vector,
            &SearchParams::new(request.semantic_top_k).with_vectors(),
        )?;
        let mut stats = FilterStats {
            semantic_matches: hits.len(),
            ..Default::default()
        };

        // Stage 2
        let mut candidates: Vec<RetrievalCandidate> = if self.is_pass_through(&analysis.categories) {
            hits.into_iter().map(Into::into).collect()
        } else {
            hits.into_iter()
                .filter(|hit| analysis.categories.contains(&hit.payload.category))
                .map(Into::into)
                .collect()
        };
        stats.category_filtered = candidates.len();

        // Stage 3
        if let Some(probes) = &probes {
            candidates = Self::filter_decorated(
                candidates,
                probes,
                request.max_decoration_score,
                request.min_plain_score,
            );
        }
        stats.negation_filtered = candidates.len();

        candidates.truncate(request.top_k);
        stats.final_results = candidates.len();

        log::info!(
            "search {:?}: semantic={} category={} negation={} final={}",
            request.query,
            stats.semantic_matches,
            stats.category_filtered,
            stats.negation_filtered,
            stats.final_results
        );

        let results: Vec<ResultItem> = candidates.into_iter().map(Into::into).collect();

        Ok(SearchResponse {
            query: request.query.clone(),
            enhanced_query: analysis.enhanced_text,
            categories: analysis.categories,
            negations: analysis.negations.into_iter().collect(),
            total_results: results.len(),
            results,
            filter_stats: stats,
        })
    }

    /// The category stage filters nothing when every known category is
    /// requested.
    fn is_pass_through(&self, categories: &[String]) -> bool {
        let known = self.analyzer.categories();
        known.len() == categories.len() && known.iter().all(|c| categories.contains(c))
    }

    /// Embed decoration and plain probes with a single provider call.
    fn embed_probes(&self, analysis: &QueryAnalysis) -> Result<ProbeSet, SearchError> {
        let decoration_terms = self
            .analyzer
            .decoration_probe_terms(&analysis.probe_category, &analysis.negations);
        let plain_terms = self.analyzer.plain_probe_terms(&analysis.probe_category);

        let split = decoration_terms.len();
        let terms: Vec<String> = decoration_terms.into_iter().chain(plain_terms).collect();

        let mut decoration = self.embedder.embed_texts(&terms)?;
        if decoration.len() != terms.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} probe embeddings, got {}",
                terms.len(),
                decoration.len()
            ))
            .into());
        }
        let plain = decoration.split_off(split);

        Ok(ProbeSet { decoration, plain })
    }

    /// Keep candidates that look plain and undecorated, most plain first.
    fn filter_decorated(
        candidates: Vec<RetrievalCandidate>,
        probes: &ProbeSet,
        max_decoration_score: f32,
        min_plain_score: f32,
    ) -> Vec<RetrievalCandidate> {
        let mut passed: Vec<RetrievalCandidate> = candidates
            .into_iter()
            .filter_map(|mut candidate| {
                let vector = candidate.hit.vector.as_deref()?;
                let decoration = max_similarity(vector, &probes.decoration);
                let plain = max_similarity(vector, &probes.plain);

                if decoration < max_decoration_score && plain > min_plain_score {
                    candidate.decoration_score = Some(decoration);
                    candidate.plain_score = Some(plain);
                    Some(candidate)
                } else {
                    None
                }
            })
            .collect();

        // Stable: equal plain scores keep semantic order.
        passed.sort_by(|a, b| {
            b.plain_score
                .partial_cmp(&a.plain_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        passed
    }
}
