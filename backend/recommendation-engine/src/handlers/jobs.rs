//! Triggers for the offline jobs. Each call runs the job to completion.

use super::AppState;
use crate::error::Result;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct VectorJobQuery {
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/jobs/profiles
pub async fn run_profiles(state: web::Data<AppState>) -> Result<HttpResponse> {
    let stats = state.profile_job.update_all_profiles().await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// POST /api/v1/jobs/vectors?force=
pub async fn run_vectors(
    state: web::Data<AppState>,
    query: web::Query<VectorJobQuery>,
) -> Result<HttpResponse> {
    let summary = state.vector_job.run(query.force).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// POST /api/v1/jobs/baseline
pub async fn run_baseline(state: web::Data<AppState>) -> Result<HttpResponse> {
    let baseline = state.baseline_job.refresh().await?;
    Ok(HttpResponse::Ok().json(json!({
        "updated": baseline.is_some(),
        "baseline": baseline,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/jobs")
            .route("/profiles", web::post().to(run_profiles))
            .route("/vectors", web::post().to(run_vectors))
            .route("/baseline", web::post().to(run_baseline)),
    );
}
