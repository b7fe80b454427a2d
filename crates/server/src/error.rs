//! API error types.

use crate::upload::UploadError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether the client may retry the same request.
    pub retriable: bool,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("storage error: {0}")]
    Storage(#[from] ferry_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] ferry_metadata::MetadataError),

    #[error("invalid request: {0}")]
    Core(#[from] ferry_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Upload(e) => e.kind(),
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(e) => match e {
                UploadError::DuplicateSequence { .. }
                | UploadError::FinalChunkConflict { .. }
                | UploadError::UploadClosed { .. }
                | UploadError::AbandonCommitted { .. }
                | UploadError::ObjectNameTaken { .. }
                | UploadError::CommitInProgress { .. } => StatusCode::CONFLICT,
                UploadError::IncompleteUpload { .. } | UploadError::InvalidChunk(_) => {
                    StatusCode::BAD_REQUEST
                }
                UploadError::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
                // Handlers turn this into a success body before it gets here.
                UploadError::AlreadyCommitted { .. } => StatusCode::OK,
                UploadError::NotFound(_) => StatusCode::NOT_FOUND,
                UploadError::Storage(ferry_storage::StorageError::NotFound(_)) => {
                    StatusCode::NOT_FOUND
                }
                UploadError::Storage(_) | UploadError::Metadata(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Storage(e) => match e {
                ferry_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                ferry_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn is_retriable(&self) -> bool {
        match self {
            Self::Upload(e) => e.is_retriable(),
            Self::Storage(e) => e.is_transient(),
            Self::Metadata(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        crate::metrics::record_upload_error(self.code());

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            retriable: self.is_retriable(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
