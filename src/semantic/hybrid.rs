//! Hybrid image + text query composition.
//!
//! The uploaded image is the primary signal; text (typed by the user or read
//! off the image) refines it. Both vectors live in the same joint embedding
//! space, so a weighted sum re-normalized to unit length is a valid query.
//!
//! - image_weight=0.6, text_weight=0.4: default
//! - text_weight=0.0: pure image similarity

use serde::{Deserialize, Serialize};

use crate::semantic::index::{normalize, IndexError};

/// Default weight of the image vector.
pub const DEFAULT_IMAGE_WEIGHT: f32 = 0.6;

/// Default weight of the text vector.
pub const DEFAULT_TEXT_WEIGHT: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub image: f32,
    pub text: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE_WEIGHT,
            text: DEFAULT_TEXT_WEIGHT,
        }
    }
}

/// Combine an image vector and a text vector into one unit-length query.
///
/// Fails when the vectors differ in length or the weighted sum has zero norm
/// (e.g. exactly opposite inputs).
pub fn combine(image: &[f32], text: &[f32], weights: HybridWeights) -> Result<Vec<f32>, IndexError> {
    if image.len() != text.len() {
        return Err(IndexError::DimensionMismatch {
            expected: image.len(),
            got: text.len(),
        });
    }

    let combined = image
        .iter()
        .zip(text.iter())
        .map(|(i, t)| weights.image * i + weights.text * t)
        .collect();

    normalize(combined)
}
