//! Population event-rate baseline for the anomaly rate signal.
//!
//! Each user's events in the lookback period are bucketed into windows of
//! `window_secs`; every non-empty bucket contributes one rate sample, so
//! the baseline describes activity while users are active.

use crate::config::AnomalyConfig;
use crate::db::SharedStore;
use crate::error::Result;
use crate::metrics::JOB_DURATION_SECONDS;
use crate::models::{InteractionEvent, PopulationBaseline, TimeWindow};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct BaselineJob {
    store: SharedStore,
    window_secs: i64,
    lookback_hours: i64,
}

impl BaselineJob {
    pub fn new(store: SharedStore, config: &AnomalyConfig) -> Self {
        Self {
            store,
            window_secs: config.window_secs,
            lookback_hours: config.baseline_window_hours,
        }
    }

    /// Recompute and store the baseline. Returns None (and keeps the previous
    /// snapshot) when the lookback period has no events.
    pub async fn refresh(&self) -> Result<Option<PopulationBaseline>> {
        let start = Instant::now();
        let now = Utc::now();
        let events = self
            .store
            .events_in(TimeWindow::trailing_hours(now, self.lookback_hours))
            .await?;

        let baseline = compute_baseline(&events, self.window_secs, self.lookback_hours);
        JOB_DURATION_SECONDS
            .with_label_values(&["baseline"])
            .observe(start.elapsed().as_secs_f64());

        match baseline {
            Some(baseline) => {
                self.store.put_baseline(baseline.clone()).await?;
                info!(
                    mean = baseline.mean_rate_per_minute,
                    std = baseline.std_rate_per_minute,
                    users = baseline.sample_users,
                    "Population baseline refreshed"
                );
                Ok(Some(baseline))
            }
            None => {
                warn!(lookback_hours = self.lookback_hours, "No events for baseline, keeping previous snapshot");
                Ok(None)
            }
        }
    }
}

pub fn compute_baseline(
    events: &[InteractionEvent],
    window_secs: i64,
    lookback_hours: i64,
) -> Option<PopulationBaseline> {
    if window_secs <= 0 {
        return None;
    }

    let mut buckets: HashMap<(Uuid, i64), u64> = HashMap::new();
    for event in events {
        let bucket = event.occurred_at.timestamp().div_euclid(window_secs);
        *buckets.entry((event.user_id, bucket)).or_insert(0) += 1;
    }
    if buckets.is_empty() {
        return None;
    }

    let minutes = window_secs as f64 / 60.0;
    let rates: Vec<f64> = buckets.values().map(|count| *count as f64 / minutes).collect();
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rates.len() as f64;

    let mut users: Vec<Uuid> = buckets.keys().map(|(user, _)| *user).collect();
    users.sort();
    users.dedup();

    Some(PopulationBaseline {
        mean_rate_per_minute: mean,
        std_rate_per_minute: variance.sqrt(),
        sample_users: users.len(),
        window_hours: lookback_hours,
        computed_at: Utc::now(),
    })
}
