//! Product catalog: image files laid out as `<root>/<category>/<file>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    /// Position in the catalog
    pub id: u64,
    pub category: String,
    /// Path relative to the catalog root, always with `/` separators
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    items: Vec<CatalogItem>,
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl Catalog {
    /// List the image files of every category under `root`.
    ///
    /// Files are ordered by category (as given) then by file name, and ids
    /// follow that order. Missing category directories are skipped.
    pub fn scan(root: &Path, categories: &[String]) -> std::io::Result<Self> {
        let mut items = Vec::new();

        for category in categories {
            let dir = root.join(category);
            if !dir.is_dir() {
                log::warn!("category directory {} not found, skipping", dir.display());
                continue;
            }

            let mut names: Vec<String> = std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && is_image_file(path))
                .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_owned))
                .collect();
            names.sort();

            log::info!("found {} {category} images", names.len());

            for name in names {
                items.push(CatalogItem {
                    id: items.len() as u64,
                    category: category.clone(),
                    path: format!("{category}/{name}"),
                });
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            items,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&CatalogItem> {
        usize::try_from(id).ok().and_then(|idx| self.items.get(idx))
    }

    /// Absolute location of an item's image.
    pub fn file_path(&self, item: &CatalogItem) -> PathBuf {
        self.root.join(&item.path)
    }

    /// Relative paths of every item, in id order.
    pub fn sources(&self) -> Vec<String> {
        self.items.iter().map(|item| item.path.clone()).collect()
    }

    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.category.clone()).or_insert(0) += 1;
        }
        counts
    }
}
