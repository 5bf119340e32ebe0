use std::sync::Arc;

use crate::engine::{EngineError, SearchEngine};
use crate::semantic::{EmbeddingCache, EmbeddingProvider};
use crate::tests::support::{
    catalog_fixture, jewelry_config, jewelry_embedder, jewelry_engine, write_png, FakeEmbedder,
    StaticVision,
};
use crate::vision::{self, DisabledVision};

/// Ten items whose embeddings fan out at increasing angles.
fn fan_embedder() -> FakeEmbedder {
    let mut embedder = FakeEmbedder::new(4);
    for i in 0..10u8 {
        embedder = embedder.with_color([i * 20, 10, 10], vec![1.0, f32::from(i) * 0.1, 0.0, 0.0]);
    }
    embedder
}

fn fan_files() -> Vec<(String, [u8; 3])> {
    (0..10u8)
        .map(|i| {
            let category = if i < 5 { "ring" } else { "necklace" };
            (format!("{category}/{i:02}.png"), [i * 20, 10, 10])
        })
        .collect()
}

#[test]
fn test_recommend_over_ten_items() {
    let dir = tempfile::tempdir().unwrap();
    let files = fan_files();
    let files: Vec<(&str, [u8; 3])> = files.iter().map(|(p, c)| (p.as_str(), *c)).collect();
    let config = catalog_fixture(dir.path(), &files);

    let engine =
        SearchEngine::build(&config, Arc::new(fan_embedder()), Arc::new(DisabledVision)).unwrap();
    let response = engine.recommend(5, Some(2)).unwrap();

    assert_eq!(response.results.len(), 2);
    assert!(response.results.iter().all(|r| r.id != 5));
    assert!(response.results[0].similarity_score >= response.results[1].similarity_score);
    // the angle to item 6 is smaller than to item 4
    let ids: Vec<u64> = response.results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![6, 4]);
}

#[test]
fn test_second_build_uses_cached_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let config = jewelry_config(dir.path());

    let first = Arc::new(jewelry_embedder());
    SearchEngine::build(&config, first.clone(), Arc::new(DisabledVision)).unwrap();
    assert_eq!(first.files_embedded(), 3);

    let second = Arc::new(jewelry_embedder());
    let engine = SearchEngine::build(&config, second.clone(), Arc::new(DisabledVision)).unwrap();
    assert_eq!(second.file_calls(), 0);
    assert_eq!(engine.health().indexed_images, 3);

    // cached vectors behave like fresh ones
    let response = engine.recommend(0, Some(1)).unwrap();
    assert_eq!(response.results[0].id, 1);
}

#[test]
fn test_catalog_growth_recomputes_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let config = jewelry_config(dir.path());

    SearchEngine::build(&config, Arc::new(jewelry_embedder()), Arc::new(DisabledVision)).unwrap();
    let old_key = EmbeddingCache::key("fake-clip", &[
        "ring/a.png".to_string(),
        "ring/b.png".to_string(),
        "necklace/c.png".to_string(),
    ]);
    let cache = EmbeddingCache::new(config.cache_dir());
    assert!(cache.path_for(&old_key).exists());

    write_png(&config.catalog_path().join("necklace/d.png"), [1, 2, 3]);

    let embedder = Arc::new(jewelry_embedder());
    let engine = SearchEngine::build(&config, embedder.clone(), Arc::new(DisabledVision)).unwrap();

    assert_eq!(embedder.files_embedded(), 4);
    assert_eq!(engine.health().indexed_images, 4);

    let new_key = EmbeddingCache::key(embedder.model_id(), &[
        "ring/a.png".to_string(),
        "ring/b.png".to_string(),
        "necklace/c.png".to_string(),
        "necklace/d.png".to_string(),
    ]);
    assert_ne!(old_key, new_key);
    assert_eq!(cache.get(&new_key, 4).map(|v| v.len()), Some(4));
}

#[test]
fn test_empty_catalog_searches_return_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = catalog_fixture(dir.path(), &[]);

    let engine =
        SearchEngine::build(&config, Arc::new(jewelry_embedder()), Arc::new(DisabledVision)).unwrap();

    let response = engine.search(&engine.request("plain ring")).unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.filter_stats.semantic_matches, 0);
    assert!(engine.featured(5).results.is_empty());
    assert_eq!(engine.categories().total_images, 0);
}

#[test]
fn test_product_with_generated_description() {
    let (engine, _embedder, _dir) = jewelry_engine(Arc::new(StaticVision::reading("")));

    let product = engine.product(2).unwrap();
    assert_eq!(product.id, 2);
    assert_eq!(product.category, "necklace");
    assert_eq!(product.path, "necklace/c.png");
    assert_eq!(product.description, "A polished band.");
}

#[test]
fn test_product_description_without_vision() {
    let (engine, _embedder, _dir) = jewelry_engine(Arc::new(DisabledVision));

    let product = engine.product(0).unwrap();
    assert_eq!(product.description, vision::disabled_description("ring"));

    assert!(matches!(engine.product(42), Err(EngineError::InvalidArgument(_))));
}

#[test]
fn test_image_path() {
    let (engine, _embedder, dir) = jewelry_engine(Arc::new(DisabledVision));

    let path = engine.image_path(1).unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(path.ends_with("ring/b.png"));
    assert!(matches!(engine.image_path(3), Err(EngineError::InvalidArgument(_))));
}

#[test]
fn test_categories_summary() {
    let (engine, _embedder, _dir) = jewelry_engine(Arc::new(DisabledVision));

    let summary = engine.categories();
    assert_eq!(summary.categories, vec!["ring", "necklace"]);
    assert_eq!(summary.total_images, 3);
    assert_eq!(summary.category_counts.get("ring"), Some(&2));
    assert_eq!(summary.category_counts.get("necklace"), Some(&1));
}

#[test]
fn test_featured_sample() {
    let (engine, _embedder, _dir) = jewelry_engine(Arc::new(DisabledVision));

    let featured = engine.featured(2);
    assert_eq!(featured.results.len(), 2);
    assert!(featured.results.iter().all(|r| r.similarity_score == 1.0));
    assert_ne!(featured.results[0].id, featured.results[1].id);

    assert_eq!(engine.featured(100).results.len(), 3);
}

#[test]
fn test_health() {
    let (engine, _embedder, _dir) = jewelry_engine(Arc::new(DisabledVision));

    let health = engine.health();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.indexed_images, 3);
    assert_eq!(health.model, "fake-clip");
    assert!(!health.vision_enabled);
}

#[test]
fn test_text_search_through_engine() {
    let (engine, _embedder, _dir) = jewelry_engine(Arc::new(DisabledVision));

    let mut request = engine.request("Necklace please");
    request.top_k = 10;
    let response = engine.search(&request).unwrap();

    assert_eq!(response.categories, vec!["necklace"]);
    assert!(response.results.iter().all(|r| r.category == "necklace"));
    assert_eq!(response.total_results, 1);

    request.top_k = 0;
    assert!(matches!(engine.search(&request), Err(EngineError::InvalidRequest(_))));
}
