//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that accept
//! `&DbPool` as the first argument. Multi-row writes that must land together
//! share one transaction through the crate-private `insert` helpers.

pub mod job_repo;
pub mod segment_repo;
pub mod workspace_repo;

pub use job_repo::JobRepo;
pub use segment_repo::SegmentRepo;
pub use workspace_repo::WorkspaceRepo;
