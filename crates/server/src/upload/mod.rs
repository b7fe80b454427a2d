//! Upload coordination: chunk receipt, commit assembly and abandon.

pub mod assembler;
pub mod coordinator;
pub mod error;
pub mod locks;

pub use assembler::{CommitAssembler, CommitOutcome};
pub use coordinator::{
    AbandonReport, AckStatus, ChunkAck, CommitTarget, IncomingChunk, UploadCoordinator,
    UploadState, UploadStatus,
};
pub use error::{UploadError, UploadResult};
pub use locks::CommitLocks;
