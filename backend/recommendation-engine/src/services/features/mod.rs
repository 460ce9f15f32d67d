// ============================================
// Feature Extractor
// ============================================
//
// Turns a content item into a fixed-dimension vector:
//
//   [ term block (hashed 1 + ln(tf)) | category block (hashed indicators) ]
//
// Each block is L2-normalized, blended by `category_weight`, and the
// result normalized again so cosine comparisons are scale-invariant.
// Output depends only on the item text and the scheme parameters.

pub mod catalog;
pub mod tokenizer;

pub use catalog::CatalogService;
pub use tokenizer::tokenize;

use crate::config::FeatureConfig;
use crate::error::{EngineError, Result};
use crate::models::{ContentItem, ContentVector};
use crate::utils::l2_normalize;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

const SCHEME_NAME: &str = "tfhash-v1";
const TAG_WEIGHT: f32 = 0.5;

/// Result of a catalog-wide extraction pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Pass stopped early; unprocessed items stay stale for the next run
    pub cancelled: bool,
}

pub struct ExtractionBatch {
    pub vectors: Vec<(Uuid, ContentVector)>,
    pub summary: ExtractionSummary,
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    scheme_version: String,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        let scheme_version = format!(
            "{}:{}:{}:{:.2}:{}",
            SCHEME_NAME,
            config.term_dims,
            config.category_dims,
            config.category_weight,
            config.title_boost
        );
        Self {
            config: config.clone(),
            scheme_version,
        }
    }

    /// Identifies the vector layout; any tuning change produces a new version.
    pub fn scheme_version(&self) -> &str {
        &self.scheme_version
    }

    pub fn dims(&self) -> usize {
        self.config.term_dims + self.config.category_dims
    }

    /// Offset of the category block inside a vector
    pub fn category_offset(&self) -> usize {
        self.config.term_dims
    }

    pub fn is_fresh(&self, vector: &ContentVector, item: &ContentItem) -> bool {
        vector.is_fresh_for(item, &self.scheme_version, self.dims())
    }

    /// Vector built under the current scheme (edits are not checked here).
    pub fn is_current(&self, vector: &ContentVector) -> bool {
        vector.matches_scheme(&self.scheme_version, self.dims())
    }

    pub fn extract(&self, item: &ContentItem) -> Result<ContentVector> {
        let size = item.title.len() + item.body.len();
        if size > self.config.max_content_bytes {
            return Err(EngineError::Validation(format!(
                "content {} is {} bytes, limit is {}",
                item.id, size, self.config.max_content_bytes
            )));
        }

        let mut term_block = self.term_block(item);
        let mut category_block = self.category_block(item);
        l2_normalize(&mut term_block);
        l2_normalize(&mut category_block);

        let category_weight = self.config.category_weight;
        let mut values: Vec<f32> = term_block
            .into_iter()
            .map(|v| v * (1.0 - category_weight))
            .chain(category_block.into_iter().map(|v| v * category_weight))
            .collect();
        l2_normalize(&mut values);

        let vector = ContentVector {
            content_id: item.id,
            values,
            scheme_version: self.scheme_version.clone(),
            primary_category: item.primary_category(),
            source_updated_at: item.updated_at,
            published_at: item.created_at,
            extracted_at: Utc::now(),
        };

        if vector.is_zero() {
            debug!(content_id = %item.id, "Content has no analyzable text, zero vector");
        }

        Ok(vector)
    }

    /// Extract vectors for a catalog, skipping items whose existing vector
    /// is still fresh unless `force` is set. Failures are tallied, never fatal.
    pub fn extract_all(
        &self,
        items: &[ContentItem],
        existing: &HashMap<Uuid, ContentVector>,
        force: bool,
    ) -> ExtractionBatch {
        let mut summary = ExtractionSummary::default();
        let mut vectors = Vec::with_capacity(items.len());

        for item in items {
            if !force {
                if let Some(current) = existing.get(&item.id) {
                    if self.is_fresh(current, item) {
                        summary.skipped += 1;
                        continue;
                    }
                }
            }

            match self.extract(item) {
                Ok(vector) => {
                    summary.extracted += 1;
                    vectors.push((item.id, vector));
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(content_id = %item.id, error = %e, "Feature extraction failed");
                }
            }
        }

        ExtractionBatch { vectors, summary }
    }

    fn term_block(&self, item: &ContentItem) -> Vec<f32> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(&item.title) {
            *counts.entry(token).or_insert(0) += self.config.title_boost;
        }
        for token in tokenize(&item.body) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut block = vec![0.0f32; self.config.term_dims];
        for (token, tf) in counts {
            let bucket = hash_bucket("term", &token, self.config.term_dims);
            block[bucket] += 1.0 + (tf as f32).ln();
        }
        block
    }

    fn category_block(&self, item: &ContentItem) -> Vec<f32> {
        let mut block = vec![0.0f32; self.config.category_dims];
        let labels = item
            .categories
            .iter()
            .map(|c| (c, 1.0f32))
            .chain(item.tags.iter().map(|t| (t, TAG_WEIGHT)));

        for (label, weight) in labels {
            let label = label.trim().to_lowercase();
            if label.is_empty() {
                continue;
            }
            let bucket = hash_bucket("category", &label, self.config.category_dims);
            block[bucket] = block[bucket].max(weight);
        }
        block
    }
}

/// Stable bucket assignment: first 8 bytes of SHA-256(namespace || token).
fn hash_bucket(namespace: &str, token: &str, dims: usize) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % dims as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cosine_similarity;
    use chrono::Duration;

    fn item(title: &str, body: &str, categories: &[&str]) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            id: Uuid::new_v4(),
            title: title.to_string(),
            body: body.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            tags: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(&FeatureConfig::default())
    }

    #[test]
    fn test_extract_is_deterministic() {
        let extractor = extractor();
        let a = item("Roof repair", "Fixing shingles after a storm", &["home"]);
        let mut b = a.clone();
        b.id = Uuid::new_v4();

        let va = extractor.extract(&a).unwrap();
        let vb = extractor.extract(&b).unwrap();
        assert_eq!(va.values, vb.values);
        assert_eq!(va.values.len(), extractor.dims());
    }

    #[test]
    fn test_vector_keeps_only_primary_category() {
        let extractor = extractor();
        let a = extractor
            .extract(&item("Raised beds", "compost", &["Home", " garden "]))
            .unwrap();
        let b = extractor
            .extract(&item("Raised beds", "compost", &["garden", "home"]))
            .unwrap();
        assert_eq!(a.primary_category.as_deref(), Some("garden"));
        assert_eq!(a.primary_category, b.primary_category);

        let none = extractor.extract(&item("Raised beds", "compost", &["  "])).unwrap();
        assert_eq!(none.primary_category, None);
    }

    #[test]
    fn test_extract_is_unit_length() {
        let v = extractor()
            .extract(&item("Kitchen design", "Open shelving ideas", &["interior"]))
            .unwrap();
        let norm: f32 = v.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_content_is_zero_vector() {
        let v = extractor().extract(&item("", "  the a  ", &[])).unwrap();
        assert!(v.is_zero());
    }

    #[test]
    fn test_similar_content_scores_higher() {
        let extractor = extractor();
        let roof = extractor.extract(&item("Roof repair", "roof repair tips", &["home"])).unwrap();
        let roof2 = extractor
            .extract(&item("Repair your roof", "roof leaks and repair", &["home"]))
            .unwrap();
        let kitchen = extractor
            .extract(&item("Kitchen design", "kitchen design trends", &["interior"]))
            .unwrap();

        assert!(
            cosine_similarity(&roof.values, &roof2.values)
                > cosine_similarity(&roof.values, &kitchen.values)
        );
    }

    #[test]
    fn test_oversized_content_rejected() {
        let config = FeatureConfig {
            max_content_bytes: 10,
            ..Default::default()
        };
        let extractor = FeatureExtractor::new(&config);
        assert!(extractor
            .extract(&item("a long title", "and a longer body", &[]))
            .is_err());
    }

    #[test]
    fn test_scheme_version_tracks_config() {
        let a = FeatureExtractor::new(&FeatureConfig::default());
        let b = FeatureExtractor::new(&FeatureConfig {
            term_dims: 128,
            ..Default::default()
        });
        assert_ne!(a.scheme_version(), b.scheme_version());
    }

    #[test]
    fn test_extract_all_skips_fresh_and_tallies_failures() {
        let config = FeatureConfig {
            max_content_bytes: 40,
            ..Default::default()
        };
        let extractor = FeatureExtractor::new(&config);
        let fresh = item("Roof", "repair", &["home"]);
        let stale = item("Kitchen", "design", &["interior"]);
        let too_big = item("Garden", "a body that is much longer than forty bytes", &[]);

        let mut existing = HashMap::new();
        existing.insert(fresh.id, extractor.extract(&fresh).unwrap());
        let mut old = extractor.extract(&stale).unwrap();
        old.scheme_version = "tfhash-v0".to_string();
        existing.insert(stale.id, old);

        let items = vec![fresh.clone(), stale.clone(), too_big];
        let batch = extractor.extract_all(&items, &existing, false);
        assert_eq!(
            batch.summary,
            ExtractionSummary {
                extracted: 1,
                skipped: 1,
                failed: 1,
                cancelled: false,
            }
        );
        assert_eq!(batch.vectors[0].0, stale.id);

        let forced = extractor.extract_all(&items, &existing, true);
        assert_eq!(forced.summary.extracted, 2);
        assert_eq!(forced.summary.skipped, 0);
    }

    #[test]
    fn test_edit_makes_vector_stale() {
        let extractor = extractor();
        let mut content = item("Roof", "repair", &["home"]);
        let vector = extractor.extract(&content).unwrap();
        assert!(extractor.is_fresh(&vector, &content));

        content.updated_at = content.updated_at + Duration::minutes(5);
        assert!(!extractor.is_fresh(&vector, &content));
        assert!(extractor.is_current(&vector));
    }
}
