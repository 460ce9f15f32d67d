pub mod access;
pub mod content;
pub mod interaction;
pub mod job;
pub mod profile;
pub mod recommendation;
pub mod report;

pub use access::{
    AccessRecord, AccessState, AccessTransition, AnomalyScore, PopulationBaseline,
    SignalBreakdown, SYSTEM_ACTOR,
};
pub use content::{ContentItem, ContentVector};
pub use interaction::{
    EventKind, InteractionEvent, NewInteractionEvent, RecommendationSource, TimeWindow,
};
pub use job::{JobHandle, JobStatus, RecommendationBatchJob};
pub use profile::UserProfile;
pub use recommendation::{Provenance, RecommendationList, ScoredItem};
pub use report::{MetricsReport, SourceSummary};
