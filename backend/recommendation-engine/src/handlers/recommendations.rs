use super::AppState;
use crate::error::Result;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub k: Option<usize>,
}

/// Ranked items for one user, with provenance
///
/// GET /api/v1/recommendations/{user_id}?k=
pub async fn get_recommendations(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<RecommendationQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let service = &state.recommendations;
    let k = query.k.unwrap_or_else(|| service.default_k());

    let list = service.recommend(user_id, k).await?;
    Ok(HttpResponse::Ok().json(list))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/recommendations/{user_id}",
        web::get().to(get_recommendations),
    );
}
