use std::collections::HashSet;
use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::hybrid::{HybridWeights, DEFAULT_IMAGE_WEIGHT, DEFAULT_TEXT_WEIGHT};
use crate::semantic::{DEFAULT_MODEL, MAX_SEMANTIC_TOP_K, MAX_TOP_K};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_CATALOG_DIR: &str = "Jewellery_Data";
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_BATCH_SIZE: usize = 8;

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_SEMANTIC_TOP_K: usize = 100;
const DEFAULT_MAX_DECORATION_SCORE: f32 = 0.25;
const DEFAULT_MIN_PLAIN_SCORE: f32 = 0.28;
/// Minimum zero-shot score to accept a detected item type
const DEFAULT_TYPE_CONFIDENCE: f32 = 0.25;

const DEFAULT_VISION_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";
const DEFAULT_VISION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine base path: {0}")]
    BasePath(String),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Directory holding config, data and caches.
///
/// `VITRINE_BASE_PATH`, or `~/.local/share/vitrine`.
pub fn base_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var("VITRINE_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .map_err(|e| ConfigError::BasePath(e.to_string()))?
        .ok_or_else(|| ConfigError::BasePath("home directory is unknown".into()))?;

    Ok(home.join(".local/share/vitrine"))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Images embedded per model call during indexing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,

    #[serde(default = "default_max_decoration_score")]
    pub max_decoration_score: f32,

    #[serde(default = "default_min_plain_score")]
    pub min_plain_score: f32,

    #[serde(default = "default_type_confidence")]
    pub type_confidence: f32,

    #[serde(default = "default_image_weight")]
    pub image_weight: f32,

    #[serde(default = "default_text_weight")]
    pub text_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            semantic_top_k: DEFAULT_SEMANTIC_TOP_K,
            max_decoration_score: DEFAULT_MAX_DECORATION_SCORE,
            min_plain_score: DEFAULT_MIN_PLAIN_SCORE,
            type_confidence: DEFAULT_TYPE_CONFIDENCE,
            image_weight: DEFAULT_IMAGE_WEIGHT,
            text_weight: DEFAULT_TEXT_WEIGHT,
        }
    }
}

impl SearchConfig {
    pub fn hybrid_weights(&self) -> HybridWeights {
        HybridWeights {
            image: self.image_weight,
            text: self.text_weight,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_semantic_top_k() -> usize {
    DEFAULT_SEMANTIC_TOP_K
}

fn default_max_decoration_score() -> f32 {
    DEFAULT_MAX_DECORATION_SCORE
}

fn default_min_plain_score() -> f32 {
    DEFAULT_MIN_PLAIN_SCORE
}

fn default_type_confidence() -> f32 {
    DEFAULT_TYPE_CONFIDENCE
}

fn default_image_weight() -> f32 {
    DEFAULT_IMAGE_WEIGHT
}

fn default_text_weight() -> f32 {
    DEFAULT_TEXT_WEIGHT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_vision_base_url")]
    pub base_url: String,

    #[serde(default = "default_vision_model")]
    pub model: String,

    #[serde(default = "default_vision_timeout_secs")]
    pub timeout_secs: u64,

    /// Taken from `OPENAI_API_KEY`, never persisted
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_vision_base_url(),
            model: default_vision_model(),
            timeout_secs: DEFAULT_VISION_TIMEOUT_SECS,
            api_key: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_vision_base_url() -> String {
    DEFAULT_VISION_BASE_URL.to_string()
}

fn default_vision_model() -> String {
    DEFAULT_VISION_MODEL.to_string()
}

fn default_vision_timeout_secs() -> u64 {
    DEFAULT_VISION_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Defaults to `<base>/data`
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: String,

    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub vision: VisionConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: None,
            catalog_dir: default_catalog_dir(),
            categories: default_categories(),
            listen: default_listen(),
            cors_origins: vec![],
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            vision: VisionConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_catalog_dir() -> String {
    DEFAULT_CATALOG_DIR.to_string()
}

fn default_categories() -> Vec<String> {
    vec!["ring".to_string(), "necklace".to_string()]
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Config {
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.categories = self
            .categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        let mut seen = HashSet::new();
        self.categories.retain(|c| seen.insert(c.clone()));
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("categories must not be empty".into()));
        }

        let search = &self.search;
        for (name, value) in [
            ("search.max_decoration_score", search.max_decoration_score),
            ("search.min_plain_score", search.min_plain_score),
            ("search.type_confidence", search.type_confidence),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between -1.0 and 1.0, got {value}"
                )));
            }
        }

        for (name, value, max) in [
            ("search.default_top_k", search.default_top_k, MAX_TOP_K),
            ("search.semantic_top_k", search.semantic_top_k, MAX_SEMANTIC_TOP_K),
        ] {
            if !(1..=max).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {max}, got {value}"
                )));
            }
        }

        if search.image_weight <= 0.0 || search.text_weight <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "search weights must be positive, got image={} text={}",
                search.image_weight, search.text_weight
            )));
        }

        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Apply environment overrides for the vision service.
    fn apply_env(&mut self) {
        self.vision.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.vision.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.vision.model = model;
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let base_path = base_path()?;
        Self::load_with(&base_path)
    }

    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_path)?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.apply_env();

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    pub fn data_root(&self) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(|| self.base_path.join("data"))
    }

    /// Root of the per-category image directories.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_root().join(&self.catalog_dir)
    }

    /// Directory for embedding cache files and downloaded models.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_root().join("cache")
    }

    #[cfg(test)]
    pub fn for_tests(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            vision: VisionConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.categories, vec!["ring", "necklace"]);
        assert_eq!(config.search.default_top_k, 5);
        assert_eq!(config.catalog_path(), dir.path().join("data").join("Jewellery_Data"));
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "categories: [Ring, Bracelet]\nsearch:\n  min_plain_score: 0.3\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.categories, vec!["ring", "bracelet"]);
        assert!((config.search.min_plain_score - 0.3).abs() < f32::EPSILON);
        assert!((config.search.max_decoration_score - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.embedding.model, DEFAULT_MODEL);

        // re-saved with the full schema
        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("semantic_top_k"));
        assert!(!saved.contains("api_key"));
    }

    #[test]
    fn test_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "categories: {oops").unwrap();
        assert!(matches!(
            Config::load_with(dir.path()),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_rejects_invalid_values() {
        let mut config = Config::default();
        config.categories = vec!["  ".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.max_decoration_score = 2.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.default_top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.text_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.batch_size = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_result_counts_requests_would_refuse() {
        let mut config = Config::default();
        config.search.default_top_k = MAX_TOP_K + 100;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.search.semantic_top_k = 5000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.search.default_top_k = MAX_TOP_K;
        config.search.semantic_top_k = MAX_SEMANTIC_TOP_K;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_loaded_top_k_above_request_limit_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "search:\n  default_top_k: 200\n").unwrap();

        assert!(matches!(
            Config::load_with(dir.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_duplicate_categories_collapse_in_order() {
        let mut config = Config::default();
        config.categories = vec!["Ring".into(), "necklace".into(), " ring ".into(), "NECKLACE".into()];

        config.validate().unwrap();
        assert_eq!(config.categories, vec!["ring", "necklace"]);
    }
}
