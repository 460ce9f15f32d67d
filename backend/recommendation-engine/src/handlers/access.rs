use super::AppState;
use crate::error::Result;
use crate::models::{AccessRecord, AccessTransition};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct AccessStateResponse {
    #[serde(flatten)]
    pub record: AccessRecord,
    pub history: Vec<AccessTransition>,
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Current access state plus transition history
///
/// GET /api/v1/access-state/{user_id}
pub async fn get_access_state(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let controller = state.anomaly.controller();

    let record = controller.get_state(user_id).await?;
    let history = controller.transitions(user_id).await?;
    Ok(HttpResponse::Ok().json(AccessStateResponse { record, history }))
}

/// Administrator unblock
///
/// POST /api/v1/access-state/{user_id}/unblock
pub async fn unblock_user(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<UnblockRequest>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let UnblockRequest { actor, note } = req.into_inner();

    let record = state
        .anomaly
        .controller()
        .unblock(user_id, &actor, note)
        .await?;
    info!(user_id = %user_id, actor = %actor, "Unblock request applied");
    Ok(HttpResponse::Ok().json(record))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/access-state")
            .route("/{user_id}", web::get().to(get_access_state))
            .route("/{user_id}/unblock", web::post().to(unblock_user)),
    );
}
