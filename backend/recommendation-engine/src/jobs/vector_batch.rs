//! Catalog-wide vector regeneration.
//!
//! Usage:
//!   recommendation-engine --mode vector-batch [--force]

use crate::error::Result;
use crate::metrics::JOB_DURATION_SECONDS;
use crate::services::features::{CatalogService, ExtractionSummary};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct VectorBatchJob {
    catalog: CatalogService,
    cancel: Arc<AtomicBool>,
}

impl VectorBatchJob {
    pub fn new(catalog: CatalogService) -> Self {
        Self {
            catalog,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to stop the pass at the next chunk boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Re-extract stale vectors, or every vector when `force` is set.
    pub async fn run(&self, force: bool) -> Result<ExtractionSummary> {
        let start = Instant::now();
        info!(force, scheme = self.catalog.extractor().scheme_version(), "Starting vector batch");

        let summary = self.catalog.refresh_all_until(force, &self.cancel).await?;

        JOB_DURATION_SECONDS
            .with_label_values(&["vector_batch"])
            .observe(start.elapsed().as_secs_f64());
        Ok(summary)
    }
}
