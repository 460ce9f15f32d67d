//! Catalog ingestion and vector freshness.
//!
//! Every consumer that scores against content vectors goes through
//! [`CatalogService::fresh_vectors`], which regenerates stale vectors
//! before handing them out.

use super::{ExtractionSummary, FeatureExtractor};
use crate::db::SharedStore;
use crate::error::Result;
use crate::metrics::VECTOR_EXTRACTIONS_TOTAL;
use crate::models::{ContentItem, ContentVector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REFRESH_CHUNK: usize = 100;

#[derive(Clone)]
pub struct CatalogService {
    store: SharedStore,
    extractor: Arc<FeatureExtractor>,
}

impl CatalogService {
    pub fn new(store: SharedStore, extractor: Arc<FeatureExtractor>) -> Self {
        Self { store, extractor }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Store an item from the catalog feed and (re)extract its vector.
    pub async fn upsert_content(&self, item: ContentItem) -> Result<ContentVector> {
        let vector = self.extractor.extract(&item)?;
        self.store.upsert_content(item).await?;
        self.store.put_vector(vector.clone()).await?;
        VECTOR_EXTRACTIONS_TOTAL.with_label_values(&["ok"]).inc();
        debug!(content_id = %vector.content_id, "Content vector updated");
        Ok(vector)
    }

    pub async fn delete_content(&self, content_id: Uuid) -> Result<bool> {
        let deleted = self.store.delete_content(content_id).await?;
        if deleted {
            info!(content_id = %content_id, "Content and vector deleted");
        }
        Ok(deleted)
    }

    /// Vectors for `content_ids` under the current scheme. Stale or missing
    /// vectors of existing items are regenerated and stored; ids without a
    /// catalog item are left out.
    pub async fn fresh_vectors(&self, content_ids: &[Uuid]) -> Result<HashMap<Uuid, ContentVector>> {
        let mut vectors = self.store.get_vectors(content_ids).await?;

        for content_id in content_ids {
            let item = match self.store.get_content(*content_id).await? {
                Some(item) => item,
                None => {
                    vectors.remove(content_id);
                    continue;
                }
            };

            let fresh = vectors
                .get(content_id)
                .map(|v| self.extractor.is_fresh(v, &item))
                .unwrap_or(false);
            if fresh {
                continue;
            }

            match self.extractor.extract(&item) {
                Ok(vector) => {
                    self.store.put_vector(vector.clone()).await?;
                    VECTOR_EXTRACTIONS_TOTAL.with_label_values(&["ok"]).inc();
                    debug!(content_id = %content_id, "Regenerated stale vector");
                    vectors.insert(*content_id, vector);
                }
                Err(e) => {
                    VECTOR_EXTRACTIONS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(content_id = %content_id, error = %e, "Could not regenerate vector");
                    vectors.remove(content_id);
                }
            }
        }

        Ok(vectors)
    }

    /// Every catalog item's vector under the current scheme, regenerating
    /// stale ones. Items that fail extraction are left out.
    pub async fn catalog_vectors(&self) -> Result<Vec<ContentVector>> {
        let items = self.store.list_content().await?;
        let mut existing: HashMap<Uuid, ContentVector> = self
            .store
            .all_vectors()
            .await?
            .into_iter()
            .map(|v| (v.content_id, v))
            .collect();

        let mut vectors = Vec::with_capacity(items.len());
        for item in &items {
            match existing.remove(&item.id) {
                Some(vector) if self.extractor.is_fresh(&vector, item) => vectors.push(vector),
                _ => match self.extractor.extract(item) {
                    Ok(vector) => {
                        self.store.put_vector(vector.clone()).await?;
                        VECTOR_EXTRACTIONS_TOTAL.with_label_values(&["ok"]).inc();
                        vectors.push(vector);
                    }
                    Err(e) => {
                        VECTOR_EXTRACTIONS_TOTAL.with_label_values(&["error"]).inc();
                        warn!(content_id = %item.id, error = %e, "Could not regenerate vector");
                    }
                },
            }
        }

        Ok(vectors)
    }

    /// Catalog-wide pass. Store write failures count as item failures.
    pub async fn refresh_all(&self, force: bool) -> Result<ExtractionSummary> {
        self.refresh_all_until(force, &AtomicBool::new(false)).await
    }

    /// Like [`refresh_all`](Self::refresh_all), checking `cancel` between
    /// chunks of `REFRESH_CHUNK` items.
    pub async fn refresh_all_until(
        &self,
        force: bool,
        cancel: &AtomicBool,
    ) -> Result<ExtractionSummary> {
        let items = self.store.list_content().await?;
        let existing: HashMap<Uuid, ContentVector> = self
            .store
            .all_vectors()
            .await?
            .into_iter()
            .map(|v| (v.content_id, v))
            .collect();

        let mut summary = ExtractionSummary::default();
        for chunk in items.chunks(REFRESH_CHUNK) {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                warn!(
                    extracted = summary.extracted,
                    remaining = items.len() - summary.extracted - summary.skipped - summary.failed,
                    "Catalog vector refresh cancelled"
                );
                break;
            }

            let batch = self.extractor.extract_all(chunk, &existing, force);
            let mut chunk_summary = batch.summary;
            for (content_id, vector) in batch.vectors {
                if let Err(e) = self.store.put_vector(vector).await {
                    chunk_summary.extracted -= 1;
                    chunk_summary.failed += 1;
                    warn!(content_id = %content_id, error = %e, "Failed to store content vector");
                }
            }

            VECTOR_EXTRACTIONS_TOTAL
                .with_label_values(&["ok"])
                .inc_by(chunk_summary.extracted as u64);
            VECTOR_EXTRACTIONS_TOTAL
                .with_label_values(&["error"])
                .inc_by(chunk_summary.failed as u64);

            summary.extracted += chunk_summary.extracted;
            summary.skipped += chunk_summary.skipped;
            summary.failed += chunk_summary.failed;
        }

        info!(
            extracted = summary.extracted,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Catalog vector refresh completed"
        );

        Ok(summary)
    }
}
