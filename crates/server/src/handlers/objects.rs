//! Committed object download.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use ferry_core::ObjectName;
use ferry_storage::BlockStore;
use futures::StreamExt;

/// GET /v1/objects/{object_name} - Stream a committed object.
#[tracing::instrument(skip(state), fields(object = %object_name))]
pub async fn get_object(
    State(state): State<AppState>,
    Path(object_name): Path<String>,
) -> ApiResult<Response> {
    let object = ObjectName::parse(&object_name)
        .map_err(|e| ApiError::BadRequest(format!("invalid object name: {e}")))?;

    let meta = state
        .blocks
        .object_meta(&object)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("object {object} not found")))?;

    let stream = state.blocks.open_object(&object).await?;
    let object_for_log = object.clone();
    let stream = stream.map(move |result| {
        result.map_err(|e| {
            tracing::error!(object = %object_for_log, error = %e, "object streaming failed mid-transfer");
            std::io::Error::other(e.to_string())
        })
    });

    let content_type = meta
        .content_type
        .unwrap_or_else(|| ferry_core::FALLBACK_CONTENT_TYPE.to_string());

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, meta.size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
