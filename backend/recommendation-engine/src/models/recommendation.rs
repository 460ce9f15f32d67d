use super::RecommendationSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub content_id: Uuid,
    pub score: f32,
    pub category: Option<String>,
}

/// Where a list came from, so later impressions can be attributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: RecommendationSource,
    pub generated_at: DateTime<Utc>,
    pub job_id: Option<Uuid>,
}

/// Persisted recommendation output; overwritten per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationList {
    pub user_id: Uuid,
    pub k: usize,
    pub items: Vec<ScoredItem>,
    pub provenance: Provenance,
}
