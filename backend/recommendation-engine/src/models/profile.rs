use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decayed, weighted preference vector for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    /// Unit-length preference vector (all zeros when nothing was folded)
    pub vector: Vec<f32>,
    /// Un-normalized decayed accumulator, referenced to `watermark`
    pub weighted_sum: Vec<f64>,
    pub total_weight: f64,
    pub event_count: u64,
    /// Timestamp of the newest folded event
    pub watermark: Option<DateTime<Utc>>,
    /// Highest log sequence folded into this profile
    pub last_event_seq: i64,
    pub scheme_version: String,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn empty(user_id: Uuid, dims: usize, scheme_version: &str) -> Self {
        Self {
            user_id,
            vector: vec![0.0; dims],
            weighted_sum: vec![0.0; dims],
            total_weight: 0.0,
            event_count: 0,
            watermark: None,
            last_event_seq: 0,
            scheme_version: scheme_version.to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.vector.iter().all(|v| *v == 0.0)
    }

    /// A profile built against another scheme cannot be updated incrementally.
    pub fn is_compatible(&self, scheme_version: &str, dims: usize) -> bool {
        self.scheme_version == scheme_version
            && self.vector.len() == dims
            && self.weighted_sum.len() == dims
    }

    /// Last-write-wins ordering key
    pub fn write_key(&self) -> (Option<DateTime<Utc>>, i64) {
        (self.watermark, self.last_event_seq)
    }
}
