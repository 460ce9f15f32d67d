//! Collector-facing endpoints: catalog feed and interaction events.

use super::AppState;
use crate::error::{EngineError, Result};
use crate::models::{ContentItem, InteractionEvent, NewInteractionEvent};
use crate::services::anomaly::AnomalyEvaluation;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ContentPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(flatten)]
    pub event: NewInteractionEvent,
    /// Collaborator-supplied abuse signal in [0, 1]
    #[serde(default)]
    pub abuse_signal: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: InteractionEvent,
    pub evaluation: AnomalyEvaluation,
}

/// Upsert a catalog item and regenerate its vector
///
/// PUT /api/v1/content/{content_id}
pub async fn put_content(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ContentPayload>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let updated_at = req.updated_at.unwrap_or_else(Utc::now);
    let item = ContentItem {
        id: path.into_inner(),
        title: req.title,
        body: req.body,
        categories: req.categories,
        tags: req.tags,
        created_at: req.created_at.unwrap_or(updated_at),
        updated_at,
    };

    let vector = state.catalog.upsert_content(item).await?;
    Ok(HttpResponse::Ok().json(vector))
}

/// DELETE /api/v1/content/{content_id}
pub async fn delete_content(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let content_id = path.into_inner();
    if state.catalog.delete_content(content_id).await? {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(EngineError::NotFound(format!("content {}", content_id)))
    }
}

/// Append an interaction and evaluate the user's anomaly score inline
///
/// POST /api/v1/events
pub async fn post_event(
    state: web::Data<AppState>,
    req: web::Json<EventPayload>,
) -> Result<HttpResponse> {
    let EventPayload {
        event,
        abuse_signal,
    } = req.into_inner();

    if let Some(signal) = abuse_signal {
        if !(0.0..=1.0).contains(&signal) {
            return Err(EngineError::Validation(
                "abuse_signal must be within [0, 1]".to_string(),
            ));
        }
    }
    if let Some(engagement) = event.engagement {
        if !engagement.is_finite() {
            return Err(EngineError::Validation(
                "engagement must be a finite number".to_string(),
            ));
        }
    }
    // Stored as a Postgres INTEGER
    if event.position.is_some_and(|p| i32::try_from(p).is_err()) {
        return Err(EngineError::Validation(format!(
            "position must be at most {}",
            i32::MAX
        )));
    }

    let event = state.store.append(event).await?;
    let evaluation = state.anomaly.evaluate(event.user_id, abuse_signal).await?;
    debug!(
        user_id = %event.user_id,
        seq = event.seq,
        score = evaluation.score.score,
        "Event ingested"
    );

    Ok(HttpResponse::Created().json(EventResponse { event, evaluation }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/content/{content_id}", web::put().to(put_content))
        .route("/content/{content_id}", web::delete().to(delete_content))
        .route("/events", web::post().to(post_event));
}
