//! Repository traits for metadata operations.

pub mod chunks;
pub mod commits;

pub use chunks::{ChunkRepo, PutOutcome};
pub use commits::{CommitRepo, CommitStatus, LeaseOutcome};
