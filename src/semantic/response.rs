//! Request and response shapes shared by every search entry point.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::semantic::index::SearchHit;
use crate::semantic::SearchError;

/// Upper bound on `top_k`.
pub const MAX_TOP_K: usize = 100;
/// Upper bound on `semantic_top_k`.
pub const MAX_SEMANTIC_TOP_K: usize = 1000;

/// A text search with its per-request tuning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub query: String,
    /// Explicit category filter; extracted from the query when absent
    pub categories: Option<Vec<String>>,
    pub top_k: usize,
    pub max_decoration_score: f32,
    pub min_plain_score: f32,
    /// Candidate pool requested from the index before filtering
    pub semantic_top_k: usize,
}

impl SearchRequest {
    /// A request for `query` using the configured defaults.
    pub fn new(query: impl Into<String>, defaults: &SearchConfig) -> Self {
        Self {
            query: query.into(),
            categories: None,
            top_k: defaults.default_top_k,
            max_decoration_score: defaults.max_decoration_score,
            min_plain_score: defaults.min_plain_score,
            semantic_top_k: defaults.semantic_top_k,
        }
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.query.trim().is_empty() {
            return Err(SearchError::InvalidRequest("query must not be empty".into()));
        }
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(SearchError::InvalidRequest(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                self.top_k
            )));
        }
        if !(1..=MAX_SEMANTIC_TOP_K).contains(&self.semantic_top_k) {
            return Err(SearchError::InvalidRequest(format!(
                "semantic_top_k must be between 1 and {MAX_SEMANTIC_TOP_K}, got {}",
                self.semantic_top_k
            )));
        }
        for (name, value) in [
            ("max_decoration_score", self.max_decoration_score),
            ("min_plain_score", self.min_plain_score),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(SearchError::InvalidRequest(format!(
                    "{name} must be between -1.0 and 1.0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Candidate counts after each pipeline stage.
///
/// Always `semantic_matches >= category_filtered >= negation_filtered >= final_results`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub semantic_matches: usize,
    pub category_filtered: usize,
    pub negation_filtered: usize,
    pub final_results: usize,
}

impl FilterStats {
    /// Stats for a search that ran stage 1 only.
    pub fn unfiltered(count: usize) -> Self {
        Self {
            semantic_matches: count,
            category_filtered: count,
            negation_filtered: count,
            final_results: count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: u64,
    pub path: String,
    pub category: String,
    pub similarity_score: f32,
    pub plain_score: Option<f32>,
    pub decoration_score: Option<f32>,
}

impl From<SearchHit> for ResultItem {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            path: hit.payload.path,
            category: hit.payload.category,
            similarity_score: hit.score,
            plain_score: None,
            decoration_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub enhanced_query: String,
    pub categories: Vec<String>,
    pub negations: Vec<String>,
    pub results: Vec<ResultItem>,
    pub total_results: usize,
    pub filter_stats: FilterStats,
}

impl SearchResponse {
    /// Response for a search without category or negation stages.
    ///
    /// Categories are the distinct categories present in the results.
    pub fn unfiltered(
        query: impl Into<String>,
        enhanced_query: impl Into<String>,
        results: Vec<ResultItem>,
    ) -> Self {
        let categories: BTreeSet<String> = results.iter().map(|r| r.category.clone()).collect();

        Self {
            query: query.into(),
            enhanced_query: enhanced_query.into(),
            categories: categories.into_iter().collect(),
            negations: vec![],
            total_results: results.len(),
            filter_stats: FilterStats::unfiltered(results.len()),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SearchRequest {
        SearchRequest::new("plain ring", &SearchConfig::default())
    }

    #[test]
    fn test_defaults_come_from_config() {
        let req = request();
        assert_eq!(req.top_k, 5);
        assert_eq!(req.semantic_top_k, 100);
        assert!((req.max_decoration_score - 0.25).abs() < f32::EPSILON);
        assert!((req.min_plain_score - 0.28).abs() < f32::EPSILON);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut req = request();
        req.top_k = 0;
        assert!(matches!(req.validate(), Err(SearchError::InvalidRequest(_))));

        let mut req = request();
        req.semantic_top_k = 5000;
        assert!(req.validate().is_err());

        let mut req = request();
        req.min_plain_score = 1.5;
        assert!(req.validate().is_err());

        let mut req = request();
        req.query = "   ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_unfiltered_response_collects_categories() {
        let item = |id: u64, category: &str| ResultItem {
            id,
            path: format!("{id}.jpg"),
            category: category.into(),
            similarity_score: 0.5,
            plain_score: None,
            decoration_score: None,
        };
        let response = SearchResponse::unfiltered(
            "q",
            "eq",
            vec![item(1, "ring"), item(2, "necklace"), item(3, "ring")],
        );

        assert_eq!(response.categories, vec!["necklace", "ring"]);
        assert_eq!(response.total_results, 3);
        assert_eq!(response.filter_stats, FilterStats::unfiltered(3));
    }
}
