//! In-memory stores backing the orchestrator.
//!
//! Each store keeps its records in a `DashMap`; every mutation happens inside
//! the map's per-entry lock, so two writers touching the same record are
//! serialized without a global lock.

pub mod analysis_store;
pub mod insight_store;
pub mod job_store;
pub mod repository_store;
pub mod sync_store;

pub use analysis_store::MemoryAnalysisStore;
pub use insight_store::MemoryInsightStore;
pub use job_store::MemoryJobStore;
pub use repository_store::MemoryRepositoryStore;
pub use sync_store::MemorySyncStore;
