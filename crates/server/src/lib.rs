//! HTTP service for ferry chunked uploads.
//!
//! This crate provides:
//! - The upload coordinator and commit assembler
//! - Chunk ingestion, commit, status and abandon endpoints
//! - Committed object download
//! - Prometheus metrics and the stale-upload janitor

pub mod error;
pub mod handlers;
pub mod janitor;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod upload;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use upload::{UploadCoordinator, UploadError};
