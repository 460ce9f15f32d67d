use super::AppState;
use crate::cache::MetricsCache;
use crate::error::Result;
use crate::models::{MetricsReport, RecommendationSource, SourceSummary, TimeWindow};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

const DEFAULT_REPORT_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub k: Option<usize>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub source: Option<RecommendationSource>,
}

impl ReportQuery {
    /// Defaults: k from config, window = the last seven days.
    fn resolve(&self, default_k: usize) -> (usize, TimeWindow) {
        let end = self.end.unwrap_or_else(Utc::now);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_REPORT_DAYS));
        (self.k.unwrap_or(default_k), TimeWindow::new(start, end))
    }
}

/// GET /api/v1/metrics-report?k=&start=&end=&source=
pub async fn get_report(
    state: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse> {
    let (k, window) = query.resolve(state.config.recommendation.default_k);
    let key = MetricsCache::report_key(k, &window, query.source);

    if let Some(cache) = &state.cache {
        if let Some(report) = cache.get::<MetricsReport>(&key).await {
            return Ok(HttpResponse::Ok().json(report));
        }
    }

    let report = state.metrics_engine.compute(k, window, query.source).await?;
    store_in_cache(&state, &key, &report).await;
    Ok(HttpResponse::Ok().json(report))
}

/// GET /api/v1/metrics-report/by-source?k=&start=&end=
pub async fn get_report_by_source(
    state: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse> {
    let (k, window) = query.resolve(state.config.recommendation.default_k);
    let key = MetricsCache::by_source_key(k, &window);

    if let Some(cache) = &state.cache {
        if let Some(summaries) = cache.get::<BTreeMap<RecommendationSource, SourceSummary>>(&key).await {
            return Ok(HttpResponse::Ok().json(summaries));
        }
    }

    let summaries = state.metrics_engine.compute_by_source(k, window).await?;
    store_in_cache(&state, &key, &summaries).await;
    Ok(HttpResponse::Ok().json(summaries))
}

async fn store_in_cache<T: Serialize>(state: &AppState, key: &str, value: &T) {
    if let Some(cache) = &state.cache {
        if let Err(e) = cache.put(key, value).await {
            warn!(key, error = %e, "Failed to cache metrics report");
        }
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/metrics-report")
            .route("", web::get().to(get_report))
            .route("/by-source", web::get().to(get_report_by_source)),
    );
}
