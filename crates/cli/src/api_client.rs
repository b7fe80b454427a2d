use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// A non-success answer from the server, decoded from its JSON error body.
#[derive(Debug, Clone, thiserror::Error)]
#[error("API error ({status}) {code}: {message}")]
pub struct ApiFailure {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    retriable: bool,
}

impl ApiFailure {
    fn from_body(status: reqwest::StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(err) => Self {
                status: status.as_u16(),
                code: err.code,
                message: err.message,
                retriable: err.retriable,
            },
            Err(_) => Self {
                status: status.as_u16(),
                code: "unknown".to_string(),
                message: body.to_string(),
                retriable: status.is_server_error(),
            },
        }
    }
}

/// Whether `err` is worth another attempt: transport failures and errors
/// the server marked retriable.
pub fn is_retriable(err: &anyhow::Error) -> bool {
    if let Some(failure) = err.downcast_ref::<ApiFailure>() {
        return failure.retriable;
    }
    err.downcast_ref::<reqwest::Error>()
        .is_some_and(|e| e.is_connect() || e.is_timeout() || e.is_request())
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// policy's retries are used up.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retriable(&e) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiFailure::from_body(status, &body).into())
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = Self::check(req.send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn capabilities(&self) -> Result<CapabilitiesResponse> {
        let url = self.url("/v1/capabilities")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// Send one raw chunk. The server records the commit target sent with
    /// the final chunk, so `target` is only attached to that one.
    pub async fn put_chunk(
        &self,
        upload_id: &str,
        sequence_key: u64,
        data: Bytes,
        is_final: bool,
        target: &ChunkTarget,
    ) -> Result<ChunkAck> {
        let mut url = self.url(&format!("/v1/uploads/{upload_id}/chunks/{sequence_key}"))?;
        {
            let mut query = url.query_pairs_mut();
            if is_final {
                query.append_pair("final", "true");
                if let Some(object_name) = &target.object_name {
                    query.append_pair("object_name", object_name);
                }
                if let Some(content_type) = &target.content_type {
                    query.append_pair("content_type", content_type);
                }
            }
        }
        self.send_json(
            self.http
                .put(url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
        )
        .await
    }

    pub async fn commit(&self, upload_id: &str, target: &ChunkTarget) -> Result<CommitResponse> {
        let url = self.url(&format!("/v1/uploads/{upload_id}/commit"))?;
        self.send_json(self.http.post(url).json(target)).await
    }

    pub async fn status(&self, upload_id: &str) -> Result<UploadStatus> {
        let url = self.url(&format!("/v1/uploads/{upload_id}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn abandon(&self, upload_id: &str) -> Result<AbandonReport> {
        let url = self.url(&format!("/v1/uploads/{upload_id}"))?;
        self.send_json(self.http.delete(url)).await
    }

    /// Stream a committed object into `dest`. Returns the bytes written.
    pub async fn download(&self, object_name: &str, dest: &Path) -> Result<u64> {
        let url = self.url(&format!("/v1/objects/{object_name}"))?;
        let response = Self::check(self.http.get(url).send().await?).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

/// Where the committed object lands. Both fields fall back to server defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapabilitiesResponse {
    pub max_chunk_size: u64,
    pub commit_mode: String,
    pub default_content_type: String,
    pub storage_backend: String,
    pub api_version: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub block_count: u64,
    pub final_sequence: u64,
    pub committed_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ChunkAck {
    pub upload_id: String,
    pub sequence_key: u64,
    pub block_id: String,
    /// `staged`, `duplicate`, `committed` or `commit_pending`.
    pub status: String,
    #[serde(default)]
    pub object: Option<ObjectInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    pub upload_id: String,
    pub status: String,
    pub object: ObjectInfo,
}

#[derive(Debug, Deserialize)]
pub struct UploadStatus {
    pub upload_id: String,
    /// `open`, `committing` or `committed`.
    pub state: String,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub final_sequence: Option<u64>,
    #[serde(default)]
    pub missing_keys: Vec<u64>,
    #[serde(default)]
    pub object: Option<ObjectInfo>,
}

#[derive(Debug, Deserialize)]
pub struct AbandonReport {
    pub upload_id: String,
    pub chunks_deleted: u64,
    pub blocks_deleted: u64,
}
