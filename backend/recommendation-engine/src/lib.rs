pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{Config, EngineConfig};
pub use error::{EngineError, Result};
pub use handlers::AppState;
pub use services::{
    AnomalyScorer, DiversityLayer, FeatureExtractor, MetricsEngine, ProfileBuilder,
    RecommendationGenerator, RecommendationService,
};
