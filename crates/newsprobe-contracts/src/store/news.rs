use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{text_from_scalar, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(deserialize_with = "text_from_scalar")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "content")]
    pub body: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, rename = "more")]
    pub extra_info: String,
    #[serde(default, rename = "image")]
    pub image_ref: Option<String>,
}

impl NewsItem {
    pub fn image(&self) -> Option<&str> {
        self.image_ref
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Read-only news collection, kept in file order.
#[derive(Debug, Clone, Default)]
pub struct NewsStore {
    items: IndexMap<String, NewsItem>,
}

impl NewsStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let items: Vec<NewsItem> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid news collection {}", path.display()))?;
        Ok(Self::from_items(items)?)
    }

    pub fn from_items(items: Vec<NewsItem>) -> Result<Self, StoreError> {
        let mut map = IndexMap::with_capacity(items.len());
        for item in items {
            if map.contains_key(&item.id) {
                return Err(StoreError::DuplicateId {
                    kind: "news",
                    id: item.id,
                });
            }
            map.insert(item.id.clone(), item);
        }
        Ok(Self { items: map })
    }

    pub fn get(&self, id: &str) -> Result<&NewsItem, StoreError> {
        self.items
            .get(id)
            .ok_or_else(|| StoreError::NewsNotFound(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
