use crate::error::{EngineError, Result};
use crate::models::EventKind;
use serde::Deserialize;

/// Top-level service configuration.
///
/// Loaded once at startup from the environment (`SERVICE__HTTP_PORT`,
/// `ENGINE__ANOMALY__THRESHOLD`, ...) plus an optional `.env` file.
/// A reload builds a new snapshot; nothing mutates a loaded config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub http_host: String,
    pub http_port: u16,
    pub service_name: String,
    pub log_format: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8013,
            service_name: "recommendation-engine".to_string(),
            log_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. When unset the engine runs on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL for the metrics report cache. Optional.
    pub url: Option<String>,
    pub report_ttl_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            report_ttl_seconds: 300,
        }
    }
}

/// Tunables shared by every engine component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub profile: ProfileConfig,
    pub recommendation: RecommendationConfig,
    pub anomaly: AnomalyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub term_dims: usize,
    pub category_dims: usize,
    /// Share of the blended vector given to the category block (0~1)
    pub category_weight: f32,
    /// How many times a title token is counted
    pub title_boost: u32,
    pub max_content_bytes: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            term_dims: 256,
            category_dims: 32,
            category_weight: 0.3,
            title_boost: 2,
            max_content_bytes: 512 * 1024,
        }
    }
}

/// Per-kind interaction weights
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventWeights {
    pub impression: f32,
    pub click: f32,
    pub completion: f32,
    pub like: f32,
    pub comment: f32,
}

impl Default for EventWeights {
    fn default() -> Self {
        Self {
            impression: 0.1,
            click: 1.0,
            completion: 2.0,
            like: 3.0,
            comment: 3.0,
        }
    }
}

impl EventWeights {
    pub fn weight(&self, kind: EventKind) -> f32 {
        match kind {
            EventKind::Impression => self.impression,
            EventKind::Click => self.click,
            EventKind::Completion => self.completion,
            EventKind::Like => self.like,
            EventKind::Comment => self.comment,
        }
    }

    fn all(&self) -> [(&'static str, f32); 5] {
        [
            ("impression", self.impression),
            ("click", self.click),
            ("completion", self.completion),
            ("like", self.like),
            ("comment", self.comment),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub half_life_hours: f64,
    pub weights: EventWeights,
    /// Users per chunk in the profile batch job
    pub batch_size: usize,
    /// Upper bound of users per pass (0 = unlimited)
    pub max_users: usize,
    /// Events appended less than this long ago are left for the next pass,
    /// so a sequence number still held by an open insert is never skipped.
    pub commit_lag_secs: i64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 72.0,
            weights: EventWeights::default(),
            batch_size: 100,
            max_users: 0,
            commit_lag_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub default_k: usize,
    pub max_k: usize,
    pub max_per_category: usize,
    pub cooldown_hours: i64,
    pub popularity_window_hours: i64,
    pub batch_size: usize,
    pub worker_concurrency: usize,
    pub max_attempts: u32,
    pub active_user_window_hours: i64,
    /// A queued or running chunk untouched for this long may be retried
    pub stale_job_secs: i64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_k: 20,
            max_k: 200,
            max_per_category: 3,
            cooldown_hours: 72,
            popularity_window_hours: 24 * 7,
            batch_size: 100,
            worker_concurrency: 4,
            max_attempts: 3,
            active_user_window_hours: 24 * 7,
            stale_job_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub rate: f64,
    pub category: f64,
    pub abuse: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            rate: 0.4,
            category: 0.2,
            abuse: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub threshold: f64,
    pub window_secs: i64,
    /// EWMA factor applied to each new window (1.0 = no memory)
    pub smoothing: f64,
    pub weights: SignalWeights,
    /// z-score at which the rate signal saturates to 1.0
    pub z_saturation: f64,
    pub min_std: f64,
    /// Fallback baseline when no population snapshot exists yet
    pub default_rate_per_minute: f64,
    pub rapid_repeat_secs: i64,
    pub repeat_saturation: u32,
    /// Auto-block suppression after an administrator unblock (0 = none)
    pub reblock_grace_hours: i64,
    pub baseline_window_hours: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            window_secs: 300,
            smoothing: 0.5,
            weights: SignalWeights::default(),
            z_saturation: 3.0,
            min_std: 0.5,
            default_rate_per_minute: 2.0,
            rapid_repeat_secs: 2,
            repeat_saturation: 5,
            reblock_grace_hours: 24,
            baseline_window_hours: 24,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.http_port == 0 {
            return Err(EngineError::Config(
                "HTTP port must be greater than 0".to_string(),
            ));
        }
        self.engine.validate()
    }
}

impl EngineConfig {
    /// Reject invalid tunables at load time rather than mid-run.
    pub fn validate(&self) -> Result<()> {
        let f = &self.features;
        if f.term_dims == 0 || f.category_dims == 0 {
            return Err(invalid("feature dimensions must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&f.category_weight) {
            return Err(invalid("features.category_weight must be within [0, 1]"));
        }
        if f.title_boost == 0 {
            return Err(invalid("features.title_boost must be at least 1"));
        }

        let p = &self.profile;
        if !(p.half_life_hours.is_finite() && p.half_life_hours > 0.0) {
            return Err(invalid("profile.half_life_hours must be positive"));
        }
        for (name, weight) in p.weights.all() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Config(format!(
                    "profile.weights.{} must be a non-negative number",
                    name
                )));
            }
        }
        if p.batch_size == 0 {
            return Err(invalid("profile.batch_size must be greater than 0"));
        }
        if p.commit_lag_secs < 0 {
            return Err(invalid("profile.commit_lag_secs must not be negative"));
        }

        let r = &self.recommendation;
        if r.default_k == 0 || r.default_k > r.max_k {
            return Err(invalid(
                "recommendation.default_k must be within [1, recommendation.max_k]",
            ));
        }
        if r.max_per_category == 0 {
            return Err(invalid("recommendation.max_per_category must be at least 1"));
        }
        if r.batch_size == 0 || r.worker_concurrency == 0 || r.max_attempts == 0 {
            return Err(invalid(
                "recommendation batch_size, worker_concurrency and max_attempts must be at least 1",
            ));
        }
        if r.cooldown_hours < 0
            || r.popularity_window_hours <= 0
            || r.active_user_window_hours <= 0
        {
            return Err(invalid("recommendation windows must not be negative"));
        }
        if r.stale_job_secs <= 0 {
            return Err(invalid("recommendation.stale_job_secs must be positive"));
        }

        let a = &self.anomaly;
        if !(a.threshold > 0.0 && a.threshold <= 1.0) {
            return Err(invalid("anomaly.threshold must be within (0, 1]"));
        }
        if !(a.smoothing > 0.0 && a.smoothing <= 1.0) {
            return Err(invalid("anomaly.smoothing must be within (0, 1]"));
        }
        let w = &a.weights;
        let weights = [w.rate, w.category, w.abuse];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid("anomaly.weights must be non-negative numbers"));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(invalid("anomaly.weights must not all be zero"));
        }
        if a.window_secs <= 0 || a.baseline_window_hours <= 0 {
            return Err(invalid("anomaly windows must be positive"));
        }
        if !(a.z_saturation > 0.0 && a.min_std > 0.0 && a.default_rate_per_minute > 0.0) {
            return Err(invalid(
                "anomaly z_saturation, min_std and default_rate_per_minute must be positive",
            ));
        }
        if a.repeat_saturation == 0 || a.rapid_repeat_secs < 0 || a.reblock_grace_hours < 0 {
            return Err(invalid("anomaly repeat and grace settings are out of range"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::Config(message.to_string())
}
