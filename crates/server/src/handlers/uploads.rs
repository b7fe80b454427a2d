//! Chunk ingestion and upload control handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upload::{
    AbandonReport, ChunkAck, CommitOutcome, CommitTarget, IncomingChunk, UploadStatus,
};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ferry_core::{CommittedObject, ObjectName, SequenceKey, UploadName};
use serde::{Deserialize, Serialize};

/// Framing allowance on top of the payload when reading a raw chunk body.
const CHUNK_UPLOAD_BUFFER: usize = 1024;

/// Allowance for JSON field names and the optional commit target.
const ENVELOPE_OVERHEAD: usize = 64 * 1024;

/// Maximum body of a commit request.
const MAX_COMMIT_BODY_SIZE: usize = 64 * 1024;

/// Query parameters of the raw chunk endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkQuery {
    /// Marks the chunk that closes the upload.
    #[serde(default, rename = "final")]
    pub is_final: bool,
    pub object_name: Option<String>,
    pub content_type: Option<String>,
}

/// Body of the JSON chunk endpoint, for transports that carry base64 text.
#[derive(Debug, Deserialize)]
pub struct ChunkEnvelope {
    pub sequence_key: u64,
    /// Base64 (standard alphabet, padded) payload.
    pub payload: String,
    #[serde(default)]
    pub is_final: bool,
    pub object_name: Option<String>,
    pub content_type: Option<String>,
}

/// Body of a commit request. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CommitRequest {
    pub object_name: Option<String>,
    pub content_type: Option<String>,
}

/// Commit response.
#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub upload_id: UploadName,
    /// `committed` or `already_committed`.
    pub status: &'static str,
    pub object: CommittedObject,
}

fn parse_upload(upload_id: &str) -> ApiResult<UploadName> {
    UploadName::parse(upload_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid upload id: {e}")))
}

fn parse_target(
    object_name: Option<String>,
    content_type: Option<String>,
) -> ApiResult<CommitTarget> {
    let object_name = object_name
        .as_deref()
        .map(ObjectName::parse)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid object name: {e}")))?;
    Ok(CommitTarget {
        object_name,
        content_type,
    })
}

/// PUT /v1/uploads/{upload_id}/chunks/{sequence_key} - Receive a raw chunk.
#[tracing::instrument(skip(state, query, req), fields(upload_id = %upload_id, sequence_key = %sequence_key))]
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((upload_id, sequence_key)): Path<(String, String)>,
    Query(query): Query<ChunkQuery>,
    req: Request,
) -> ApiResult<Json<ChunkAck>> {
    let upload = parse_upload(&upload_id)?;
    let sequence = sequence_key
        .parse::<u64>()
        .map(SequenceKey::new)
        .map_err(|e| ApiError::BadRequest(format!("invalid sequence key: {e}")))?;
    let target = parse_target(query.object_name, query.content_type)?;

    let max_chunk_size = state.config.server.max_chunk_size as usize;
    let payload = axum::body::to_bytes(req.into_body(), max_chunk_size + CHUNK_UPLOAD_BUFFER)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read chunk: {e}")))?;

    let ack = state
        .coordinator
        .receive_chunk(IncomingChunk {
            upload,
            sequence,
            payload,
            is_final: query.is_final,
            target,
        })
        .await?;
    Ok(Json(ack))
}

/// POST /v1/uploads/{upload_id}/chunks - Receive a base64 chunk envelope.
#[tracing::instrument(skip(state, req), fields(upload_id = %upload_id))]
pub async fn post_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ChunkAck>> {
    let upload = parse_upload(&upload_id)?;

    let max_chunk_size = state.config.server.max_chunk_size as usize;
    let limit = max_chunk_size.div_ceil(3) * 4 + ENVELOPE_OVERHEAD;
    let body = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    let envelope: ChunkEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;

    let payload = STANDARD
        .decode(envelope.payload.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 payload: {e}")))?;
    let target = parse_target(envelope.object_name, envelope.content_type)?;

    let ack = state
        .coordinator
        .receive_chunk(IncomingChunk {
            upload,
            sequence: SequenceKey::new(envelope.sequence_key),
            payload: Bytes::from(payload),
            is_final: envelope.is_final,
            target,
        })
        .await?;
    Ok(Json(ack))
}

/// POST /v1/uploads/{upload_id}/commit - Commit (or re-drive the commit of) an upload.
#[tracing::instrument(skip(state, req), fields(upload_id = %upload_id))]
pub async fn commit_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Json<CommitResponse>> {
    let upload = parse_upload(&upload_id)?;

    let body = axum::body::to_bytes(req.into_body(), MAX_COMMIT_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    let request: CommitRequest = if body.is_empty() {
        CommitRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?
    };
    let target = parse_target(request.object_name, request.content_type)?;

    let outcome = state.coordinator.commit(&upload, target).await?;
    let status = match &outcome {
        CommitOutcome::Committed(_) => "committed",
        CommitOutcome::AlreadyCommitted(_) => "already_committed",
    };

    Ok(Json(CommitResponse {
        upload_id: upload,
        status,
        object: outcome.into_object(),
    }))
}

/// GET /v1/uploads/{upload_id} - Report upload progress.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatus>> {
    let upload = parse_upload(&upload_id)?;
    Ok(Json(state.coordinator.status(&upload).await?))
}

/// DELETE /v1/uploads/{upload_id} - Abandon an uncommitted upload.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn abandon_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<AbandonReport>> {
    let upload = parse_upload(&upload_id)?;
    Ok(Json(state.coordinator.abandon(&upload).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_query_final_flag() {
        let query: ChunkQuery =
            serde_json::from_str(r#"{"final": true, "content_type": "application/zip"}"#).unwrap();
        assert!(query.is_final);
        assert_eq!(query.content_type.as_deref(), Some("application/zip"));
        assert!(query.object_name.is_none());
    }

    #[test]
    fn test_parse_target_rejects_bad_object_name() {
        assert!(parse_target(Some("../etc/passwd".into()), None).is_err());
        let target = parse_target(Some("report.zip".into()), None).unwrap();
        assert_eq!(target.object_name.unwrap().as_str(), "report.zip");
    }
}
