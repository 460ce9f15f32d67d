pub mod baseline;
pub mod profile_batch;
pub mod recommendation_batch;
pub mod vector_batch;

pub use baseline::BaselineJob;
pub use profile_batch::{ProfileBatchJob, ProfileBatchStats, PROFILE_CHECKPOINT};
pub use recommendation_batch::{BatchDispatcher, ChunkRunner};
pub use vector_batch::VectorBatchJob;
