//! In-memory vector index with cosine similarity search.
//!
//! Holds one unit-normalized embedding per catalog image together with its
//! payload (category and source path). Built once at startup and read-only
//! afterwards, so concurrent searches need no locking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Payload stored alongside every indexed vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPayload {
    pub category: String,
    pub path: String,
}

/// An item in the vector index.
#[derive(Debug, Clone)]
pub struct IndexedItem {
    /// Stable catalog id
    pub id: u64,
    /// The unit-length embedding vector
    pub vector: Vec<f32>,
    pub payload: ItemPayload,
}

/// Parameters for a single nearest-neighbor query.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// Maximum number of hits to return
    pub limit: usize,
    /// Attach the stored vector to every hit
    pub with_vectors: bool,
    /// Exact-match category constraint
    pub category: Option<String>,
}

impl SearchParams {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_vectors(mut self) -> Self {
        self.with_vectors = true;
        self
    }

    pub fn in_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }
}

/// A scored hit returned by [`VectorIndex::search`].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: u64,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
    pub payload: ItemPayload,
    pub vector: Option<Vec<f32>>,
}

/// In-memory vector index for image similarity search.
pub struct VectorIndex {
    items: Vec<IndexedItem>,
    /// Item id -> position in `items`
    positions: HashMap<u64, usize>,
    dimensions: usize,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    /// Get the number of items in the index.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert or replace items.
    ///
    /// Vectors are normalized on the way in. Fails on the first item whose
    /// vector has the wrong dimensions or zero norm; items before it stay
    /// inserted.
    pub fn upsert(&mut self, items: Vec<IndexedItem>) -> Result<(), IndexError> {
        for mut item in items {
            if item.vector.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    got: item.vector.len(),
                });
            }
            item.vector = normalize(item.vector)?;

            match self.positions.get(&item.id) {
                Some(&pos) => self.items[pos] = item,
                None => {
                    self.positions.insert(item.id, self.items.len());
                    self.items.push(item);
                }
            }
        }

        Ok(())
    }

    /// Get an item by id.
    pub fn get(&self, id: u64) -> Option<&IndexedItem> {
        self.positions.get(&id).map(|&pos| &self.items[pos])
    }

    /// Search for the nearest items by cosine similarity.
    ///
    /// Results are sorted by score (highest first); equal scores keep
    /// ascending id order.
    pub fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<SearchHit>, IndexError> {
        if self.items.is_empty() {
            return Ok(vec![]);
        }
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query = normalize(query.to_vec())?;

        let mut scored: Vec<(f32, &IndexedItem)> = self
            .items
            .iter()
            .filter(|item| {
                params
                    .category
                    .as_ref()
                    .map(|category| &item.payload.category == category)
                    .unwrap_or(true)
            })
            .map(|item| (dot(&query, &item.vector), item))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.id.cmp(&b.1.id))
        });
        scored.truncate(params.limit);

        Ok(scored
            .into_iter()
            .map(|(score, item)| SearchHit {
                id: item.id,
                score,
                payload: item.payload.clone(),
                vector: params.with_vectors.then(|| item.vector.clone()),
            })
            .collect())
    }
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length.
pub fn normalize(mut v: Vec<f32>) -> Result<Vec<f32>, IndexError> {
    let norm = l2_norm(&v);
    if norm < f32::EPSILON {
        return Err(IndexError::ZeroNormVector);
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Ok(v)
}

/// Dot product; equals cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(a, b)| a * b).sum()
}

/// Highest cosine similarity between `v` and any of `probes`.
///
/// Returns `f32::NEG_INFINITY` for an empty probe set so that no threshold
/// comparison can pass by accident.
pub fn max_similarity(v: &[f32], probes: &[Vec<f32>]) -> f32 {
    probes
        .iter()
        .map(|probe| dot(v, probe))
        .fold(f32::NEG_INFINITY, f32::max)
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}
