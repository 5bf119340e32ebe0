//! Vision-language capabilities: reading text off an image and writing
//! product descriptions.
//!
//! Both are optional. Without a configured service `DisabledVision` reads no
//! text and refuses to describe; callers then fall back to canned copy.

mod openai;

use std::sync::Arc;

use image::DynamicImage;

use crate::config::VisionConfig;

pub use openai::OpenAiVision;

/// Description used when no vision service is configured.
pub fn disabled_description(category: &str) -> String {
    format!(
        "A beautiful {category} piece from our collection. This item showcases elegant craftsmanship and timeless design."
    )
}

/// Description used when the vision service fails.
pub fn fallback_description(category: &str) -> String {
    format!(
        "An exquisite {category} featuring sophisticated design and premium quality. Perfect for adding elegance to any occasion."
    )
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Vision service is not configured")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vision API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Vision API returned no content")]
    EmptyResponse,

    #[error("Failed to prepare image: {0}")]
    Image(String),
}

pub trait Vision: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Text visible in the image, or an empty string when there is none.
    fn extract_text(&self, image: &DynamicImage) -> Result<String, VisionError>;

    /// A short marketing description of an item of `category`.
    fn describe(&self, image: &DynamicImage, category: &str) -> Result<String, VisionError>;
}

/// Vision for deployments without a vision service.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVision;

impl Vision for DisabledVision {
    fn is_enabled(&self) -> bool {
        false
    }

    fn extract_text(&self, _image: &DynamicImage) -> Result<String, VisionError> {
        Ok(String::new())
    }

    fn describe(&self, _image: &DynamicImage, _category: &str) -> Result<String, VisionError> {
        Err(VisionError::Disabled)
    }
}

/// Describe with the service, substituting canned copy on failure.
pub fn describe_or_fallback(vision: &dyn Vision, image: &DynamicImage, category: &str) -> String {
    match vision.describe(image, category) {
        Ok(description) => description,
        Err(VisionError::Disabled) => disabled_description(category),
        Err(e) => {
            log::warn!("description generation failed: {e}");
            fallback_description(category)
        }
    }
}

/// Build the vision capability described by the config.
pub fn from_config(config: &VisionConfig) -> Arc<dyn Vision> {
    if !config.enabled {
        log::info!("vision disabled in config");
        return Arc::new(DisabledVision);
    }

    match &config.api_key {
        Some(key) if !key.is_empty() => {
            log::info!("vision enabled: model={} base_url={}", config.model, config.base_url);
            Arc::new(OpenAiVision::new(
                key.clone(),
                config.base_url.clone(),
                config.model.clone(),
                config.timeout_secs,
            ))
        }
        _ => {
            log::warn!("vision enabled but no API key set, text extraction and descriptions are off");
            Arc::new(DisabledVision)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct BrokenVision;

    impl Vision for BrokenVision {
        fn is_enabled(&self) -> bool {
            true
        }

        fn extract_text(&self, _image: &DynamicImage) -> Result<String, VisionError> {
            Err(VisionError::EmptyResponse)
        }

        fn describe(&self, _image: &DynamicImage, _category: &str) -> Result<String, VisionError> {
            Err(VisionError::Api {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    fn blank() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(2, 2))
    }

    #[test]
    fn test_disabled_vision_reads_nothing() {
        let vision = DisabledVision;
        assert!(!vision.is_enabled());
        assert_eq!(vision.extract_text(&blank()).unwrap(), "");
        assert!(matches!(vision.describe(&blank(), "ring"), Err(VisionError::Disabled)));
    }

    #[test]
    fn test_describe_fallbacks() {
        assert_eq!(
            describe_or_fallback(&DisabledVision, &blank(), "ring"),
            disabled_description("ring")
        );
        assert_eq!(
            describe_or_fallback(&BrokenVision, &blank(), "necklace"),
            fallback_description("necklace")
        );
        assert!(fallback_description("necklace").starts_with("An exquisite necklace"));
    }

    #[test]
    fn test_from_config_without_key_is_disabled() {
        let config = VisionConfig {
            enabled: true,
            api_key: None,
            ..Default::default()
        };
        assert!(!from_config(&config).is_enabled());

        let config = VisionConfig {
            enabled: false,
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(!from_config(&config).is_enabled());

        let config = VisionConfig {
            enabled: true,
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(from_config(&config).is_enabled());
    }
}
