pub mod anomaly;
pub mod diversity;
pub mod evaluation;
pub mod features;
pub mod profile_builder;
pub mod ranking;
pub mod recommendation;

pub use anomaly::{AccessController, AnomalyScorer, AnomalyService};
pub use diversity::DiversityLayer;
pub use evaluation::MetricsEngine;
pub use features::{CatalogService, FeatureExtractor};
pub use profile_builder::{ProfileBuilder, ProfileUpdater};
pub use ranking::{PopularityRanker, RecommendationGenerator};
pub use recommendation::RecommendationService;
