//! Redis cache for computed metrics reports.
//!
//! Reports are disposable; a cache failure is logged and the report is
//! recomputed, never surfaced to the caller.

use crate::error::{EngineError, Result};
use crate::metrics::REPORT_CACHE_EVENTS;
use crate::models::{RecommendationSource, TimeWindow};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MetricsCache {
    redis: ConnectionManager,
    ttl: Duration,
}

impl MetricsCache {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            redis,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub async fn connect(url: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager, ttl_secs))
    }

    pub fn report_key(k: usize, window: &TimeWindow, source: Option<RecommendationSource>) -> String {
        format!(
            "engine:report:v1:{}:{}:{}:{}",
            k,
            window.start.timestamp_millis(),
            window.end.timestamp_millis(),
            source.map(|s| s.as_str()).unwrap_or("all")
        )
    }

    pub fn by_source_key(k: usize, window: &TimeWindow) -> String {
        format!(
            "engine:report_by_source:v1:{}:{}:{}",
            k,
            window.start.timestamp_millis(),
            window.end.timestamp_millis()
        )
    }

    /// Cached value, or None on a miss or any cache failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.redis.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    REPORT_CACHE_EVENTS.with_label_values(&["hit"]).inc();
                    debug!(key, "Report cache HIT");
                    Some(value)
                }
                Err(e) => {
                    REPORT_CACHE_EVENTS.with_label_values(&["error"]).inc();
                    warn!(key, error = %e, "Failed to deserialize cached report");
                    None
                }
            },
            Ok(None) => {
                REPORT_CACHE_EVENTS.with_label_values(&["miss"]).inc();
                None
            }
            Err(e) => {
                REPORT_CACHE_EVENTS.with_label_values(&["error"]).inc();
                warn!(key, error = %e, "Redis read error for report cache");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string(value)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, data, self.ttl.as_secs())
            .await
            .map_err(|e| {
                REPORT_CACHE_EVENTS.with_label_values(&["error"]).inc();
                EngineError::Redis(e.to_string())
            })?;

        debug!(key, ttl_secs = self.ttl.as_secs(), "Report cache WRITE");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_report_keys_are_distinct_per_segment() {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
        );
        let all = MetricsCache::report_key(10, &window, None);
        let cb = MetricsCache::report_key(10, &window, Some(RecommendationSource::ContentBased));
        let k5 = MetricsCache::report_key(5, &window, None);

        assert_ne!(all, cb);
        assert_ne!(all, k5);
        assert!(cb.ends_with(":content_based"));
        assert_ne!(all, MetricsCache::by_source_key(10, &window));
    }
}
