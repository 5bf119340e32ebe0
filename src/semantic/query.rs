//! Query analysis: category and negation extraction, probe-term synthesis
//! and query rewriting.
//!
//! An embedding model scores "ring with no diamonds" close to rings *with*
//! diamonds, so negated terms are pulled out of the text, the query is
//! rewritten toward plainness, and probe phrases are generated for the
//! decoration filter of the retrieval pipeline.

use std::collections::BTreeSet;

/// Probe category used when no category could be resolved.
pub const FALLBACK_CATEGORY: &str = "jewelry";

/// Result of analyzing one free-text query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnalysis {
    /// Resolved categories, in known-category order
    pub categories: Vec<String>,
    /// Negated terms, sorted
    pub negations: BTreeSet<String>,
    /// Category used to build probe terms
    pub probe_category: String,
    /// Lowercased query with negations rewritten
    pub enhanced_text: String,
}

impl QueryAnalysis {
    pub fn has_negations(&self) -> bool {
        !self.negations.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    categories: Vec<String>,
}

impl QueryAnalyzer {
    pub fn new(categories: Vec<String>) -> Self {
        Self {
            categories: categories.into_iter().map(|c| c.to_lowercase()).collect(),
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    fn is_category(&self, token: &str) -> bool {
        self.categories.iter().any(|c| c == token)
    }

    /// Run the full analysis.
    ///
    /// `explicit` categories take precedence over extraction; an empty list
    /// counts as absent.
    pub fn analyze(&self, query: &str, explicit: Option<&[String]>) -> QueryAnalysis {
        let categories = match explicit {
            Some(explicit) if !explicit.is_empty() => {
                explicit.iter().map(|c| c.to_lowercase()).collect()
            }
            _ => self.extract_categories(query),
        };
        let negations = self.extract_negations(query);
        let probe_category = categories
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string());
        let enhanced_text = self.rewrite_query(query, &negations);

        QueryAnalysis {
            categories,
            negations,
            probe_category,
            enhanced_text,
        }
    }

    /// Every known category mentioned in the query, or all of them if none is.
    pub fn extract_categories(&self, query: &str) -> Vec<String> {
        let q = query.to_lowercase();
        let found: Vec<String> = self
            .categories
            .iter()
            .filter(|c| q.contains(c.as_str()))
            .cloned()
            .collect();

        if found.is_empty() {
            self.categories.clone()
        } else {
            found
        }
    }

    /// Terms following "no" or "without", minus known category names.
    pub fn extract_negations(&self, query: &str) -> BTreeSet<String> {
        let q = query.to_lowercase();
        let mut negations = BTreeSet::new();

        let words: Vec<&str> = q.split_whitespace().collect();
        for pair in words.windows(2) {
            if pair[0] == "no" && !self.is_category(pair[1]) {
                negations.insert(pair[1].to_string());
            }
        }

        // Only the first "without" counts, and it may sit inside a word.
        if let Some((_, after)) = q.split_once("without") {
            if let Some(next) = after.split_whitespace().next() {
                if !self.is_category(next) {
                    negations.insert(next.to_string());
                }
            }
        }

        negations
    }

    /// Phrases describing `category` decorated with any of `negations`.
    pub fn decoration_probe_terms(
        &self,
        category: &str,
        negations: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let mut terms = BTreeSet::new();

        for neg in negations {
            terms.extend([
                format!("{category} with {neg}"),
                format!("{neg} {category}"),
                format!("{category} featuring {neg}"),
                format!("{neg}s on {category}"),
                format!("{category} set with {neg}s"),
            ]);

            if ["diamond", "stone", "gem"].iter().any(|s| neg.contains(s)) {
                terms.extend([
                    format!("jeweled {category}"),
                    format!("sparkly {category}"),
                    format!("{category} with stones"),
                    format!("{category} with gems"),
                ]);
            }
            if ["pendant", "charm"].iter().any(|s| neg.contains(s)) {
                terms.extend([
                    format!("{category} with pendant"),
                    format!("{category} with charm"),
                    format!("pendant {category}"),
                    format!("charm {category}"),
                ]);
            }
            if ["pattern", "design", "engraving"].iter().any(|s| neg.contains(s)) {
                terms.extend([
                    format!("patterned {category}"),
                    format!("engraved {category}"),
                    format!("ornate {category}"),
                    format!("{category} with design"),
                ]);
            }
        }

        terms
    }

    /// Canonical phrases describing a plain item of `category`.
    pub fn plain_probe_terms(&self, category: &str) -> Vec<String> {
        let terms: &[&str] = match category {
            "ring" => &[
                "plain gold ring",
                "simple ring band",
                "smooth metal ring",
                "minimalist ring",
                "wedding band",
                "plain ring",
            ],
            "necklace" => &[
                "plain gold necklace",
                "simple chain necklace",
                "minimalist necklace",
                "basic necklace chain",
                "smooth necklace",
            ],
            _ => return vec![format!("plain simple {category}")],
        };

        terms.iter().map(|t| t.to_string()).collect()
    }

    /// Lowercase the query and replace "no X" / "without X" with positive
    /// phrasing. Negations are applied in sorted order.
    pub fn rewrite_query(&self, query: &str, negations: &BTreeSet<String>) -> String {
        let mut enhanced = query.to_lowercase();

        for neg in negations {
            enhanced = enhanced.replace(&format!("no {neg}"), "plain simple");
            enhanced = enhanced.replace(&format!("without {neg}"), "minimalist smooth");
        }

        enhanced
    }
}
