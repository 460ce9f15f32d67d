/// HTTP handlers for the recommendation engine API
pub mod access;
pub mod batch;
pub mod ingest;
pub mod jobs;
pub mod recommendations;
pub mod reports;

use crate::cache::MetricsCache;
use crate::config::EngineConfig;
use crate::db::SharedStore;
use crate::error::Result;
use crate::jobs::{BaselineJob, BatchDispatcher, ProfileBatchJob, VectorBatchJob};
use crate::metrics::serve_metrics;
use crate::services::{
    AnomalyService, CatalogService, FeatureExtractor, MetricsEngine, PopularityRanker,
    ProfileBuilder, ProfileUpdater, RecommendationGenerator, RecommendationService,
};
use actix_web::{web, HttpResponse};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

/// Shared application state, built once per config snapshot.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<EngineConfig>,
    pub catalog: CatalogService,
    pub updater: Arc<ProfileUpdater>,
    pub recommendations: Arc<RecommendationService>,
    pub anomaly: Arc<AnomalyService>,
    pub metrics_engine: Arc<MetricsEngine>,
    pub dispatcher: BatchDispatcher,
    pub profile_job: Arc<ProfileBatchJob>,
    pub vector_job: Arc<VectorBatchJob>,
    pub baseline_job: Arc<BaselineJob>,
    pub cache: Option<MetricsCache>,
}

impl AppState {
    /// Wire every engine component against one store and config snapshot.
    pub fn build(
        store: SharedStore,
        config: EngineConfig,
        cache: Option<MetricsCache>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let extractor = Arc::new(FeatureExtractor::new(&config.features));
        let scheme = extractor.scheme_version().to_string();
        let dims = extractor.dims();
        let catalog = CatalogService::new(store.clone(), extractor.clone());

        let builder = ProfileBuilder::new(&config.profile, &scheme, dims);
        let updater = Arc::new(
            ProfileUpdater::new(store.clone(), catalog.clone(), builder)
                .with_commit_lag(Duration::seconds(config.profile.commit_lag_secs)),
        );

        let rec = &config.recommendation;
        let recommendations = Arc::new(RecommendationService::new(
            store.clone(),
            catalog.clone(),
            updater.clone(),
            RecommendationGenerator::new(&scheme, dims, rec.max_per_category),
            PopularityRanker::new(config.profile.weights.clone(), rec.max_per_category),
            rec.clone(),
        ));
        let dispatcher = BatchDispatcher::new(store.clone(), recommendations.clone(), rec.clone());

        Ok(Self {
            anomaly: Arc::new(AnomalyService::new(store.clone(), &config.anomaly, extractor.clone())),
            metrics_engine: Arc::new(MetricsEngine::new(store.clone(), extractor)),
            profile_job: Arc::new(ProfileBatchJob::new(store.clone(), updater.clone(), &config.profile)),
            vector_job: Arc::new(VectorBatchJob::new(catalog.clone())),
            baseline_job: Arc::new(BaselineJob::new(store.clone(), &config.anomaly)),
            store,
            config,
            catalog,
            updater,
            recommendations,
            dispatcher,
            cache,
        })
    }
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "recommendation-engine",
    }))
}

/// Register all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics))
        .service(
            web::scope("/api/v1")
                .configure(recommendations::register_routes)
                .configure(access::register_routes)
                .configure(reports::register_routes)
                .configure(batch::register_routes)
                .configure(jobs::register_routes)
                .configure(ingest::register_routes),
        );
}
