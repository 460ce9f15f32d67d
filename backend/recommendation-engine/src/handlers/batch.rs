use super::AppState;
use crate::error::{EngineError, Result};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ActiveUsers {
    pub limit: usize,
}

/// Either an explicit user list or `all_active`, never both.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub user_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub all_active: Option<ActiveUsers>,
    #[serde(default)]
    pub k: Option<usize>,
}

/// Submit a batch; returns one handle per chunk
///
/// POST /api/v1/batch/recommendations
pub async fn submit_batch(
    state: web::Data<AppState>,
    req: web::Json<BatchRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let k = req.k.unwrap_or(state.config.recommendation.default_k);

    let handles = match (req.user_ids, req.all_active) {
        (Some(user_ids), None) => state.dispatcher.submit(user_ids, k).await?,
        (None, Some(active)) => state.dispatcher.submit_active(active.limit, k).await?,
        _ => {
            return Err(EngineError::Validation(
                "provide exactly one of user_ids or all_active".to_string(),
            ))
        }
    };

    Ok(HttpResponse::Accepted().json(handles))
}

/// GET /api/v1/batch/jobs/{job_id}
pub async fn get_job(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse> {
    let job = state.dispatcher.get_job(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(job))
}

/// POST /api/v1/batch/jobs/{job_id}/retry
pub async fn retry_job(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse> {
    let handle = state.dispatcher.retry(path.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(handle))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/batch")
            .route("/recommendations", web::post().to(submit_batch))
            .route("/jobs/{job_id}", web::get().to(get_job))
            .route("/jobs/{job_id}/retry", web::post().to(retry_job)),
    );
}
