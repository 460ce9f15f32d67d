use super::{RecommendationSource, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retrospective ranking-quality snapshot.
///
/// `None` values are the "undefined" sentinel (zero denominator). The
/// report is disposable and may be served from cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub k: usize,
    pub window: TimeWindow,
    pub source: Option<RecommendationSource>,
    pub generated_at: DateTime<Utc>,
    pub impressions: u64,
    pub clicks: u64,
    pub users_evaluated: usize,
    pub users_with_relevant: usize,
    pub precision_at_k: Option<f64>,
    pub recall_at_k: Option<f64>,
    pub f1: Option<f64>,
    pub ndcg_at_k: Option<f64>,
    pub ctr: Option<f64>,
    pub avg_engagement: Option<f64>,
    pub diversity: Option<f64>,
    pub coverage: Option<f64>,
    /// Metrics or segments that lacked data
    pub insufficient_data: Vec<String>,
}

/// Per-source comparison row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: RecommendationSource,
    pub impressions: u64,
    pub users_evaluated: usize,
    pub precision_at_k: Option<f64>,
    pub recall_at_k: Option<f64>,
    pub ndcg_at_k: Option<f64>,
    pub ctr: Option<f64>,
    pub avg_engagement: Option<f64>,
    pub insufficient_data: bool,
}

impl SourceSummary {
    pub fn from_report(source: RecommendationSource, report: &MetricsReport) -> Self {
        Self {
            source,
            impressions: report.impressions,
            users_evaluated: report.users_evaluated,
            precision_at_k: report.precision_at_k,
            recall_at_k: report.recall_at_k,
            ndcg_at_k: report.ndcg_at_k,
            ctr: report.ctr,
            avg_engagement: report.avg_engagement,
            insufficient_data: report.users_evaluated == 0,
        }
    }
}
