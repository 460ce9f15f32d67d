use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry as supplied by the content feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// Category used for diversity decisions: the first one in sorted order.
    pub fn primary_category(&self) -> Option<String> {
        self.categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .min()
    }
}

/// Derived feature vector, owned 1:1 by a [`ContentItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVector {
    pub content_id: Uuid,
    pub values: Vec<f32>,
    pub scheme_version: String,
    pub primary_category: Option<String>,
    /// `updated_at` of the item when this vector was extracted
    pub source_updated_at: DateTime<Utc>,
    /// Item creation time, used as the recency tie-break
    pub published_at: DateTime<Utc>,
    pub extracted_at: DateTime<Utc>,
}

impl ContentVector {
    /// Zero vectors come from empty content and are never comparable.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    pub fn matches_scheme(&self, scheme_version: &str, dims: usize) -> bool {
        self.scheme_version == scheme_version && self.values.len() == dims
    }

    /// Fresh = current scheme and no edit to the item since extraction.
    pub fn is_fresh_for(&self, item: &ContentItem, scheme_version: &str, dims: usize) -> bool {
        self.matches_scheme(scheme_version, dims) && self.source_updated_at >= item.updated_at
    }
}
