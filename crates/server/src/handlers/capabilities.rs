//! Capability discovery and health endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use ferry_core::config::CommitMode;
use ferry_metadata::MetadataStore;
use ferry_storage::BlockStore;
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Maximum chunk payload in bytes.
    pub max_chunk_size: u64,
    /// Whether a final chunk is committed before it is acknowledged.
    pub commit_mode: CommitMode,
    /// Content type used when a request names none.
    pub default_content_type: String,
    /// Object store backend.
    pub storage_backend: &'static str,
    /// API version.
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    Ok(Json(CapabilitiesResponse {
        max_chunk_size: state.config.server.max_chunk_size,
        commit_mode: state.config.upload.commit_mode,
        default_content_type: state.config.upload.default_content_type.clone(),
        storage_backend: state.blocks.backend_name(),
        api_version: "v1",
    }))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Liveness and store connectivity.
///
/// Returns only non-sensitive information (status and version).
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.blocks.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
