//! Command line client for the ferry upload service.

mod api_client;

use anyhow::{Context, Result};
use api_client::{ApiClient, ChunkAck, ChunkTarget, ObjectInfo, RetryPolicy, with_retry};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size used when the server allows it.
const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "ferryctl")]
#[command(about = "Upload files to a ferry server in parallel chunks")]
#[command(version)]
struct Cli {
    /// Server API URL
    #[arg(long, env = "FERRY_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Retries for transient failures before giving up
    #[arg(long, default_value_t = 5)]
    retries: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file as a sequence of chunks
    Upload {
        /// File to upload
        file: PathBuf,
        /// Upload id (default: the file name)
        #[arg(long)]
        upload_id: Option<String>,
        /// Chunk size in bytes (default: 8 MiB, capped by the server limit)
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Chunks in flight at once
        #[arg(long, default_value_t = 8)]
        parallel: usize,
        /// Content type recorded on the committed object
        #[arg(long)]
        content_type: Option<String>,
        /// Name of the committed object (default: the upload id)
        #[arg(long)]
        object_name: Option<String>,
        /// Send non-final chunks in random order
        #[arg(long, default_value_t = false)]
        shuffle: bool,
        /// How long to wait for a deferred commit, in seconds
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,
    },
    /// Show what the server has received for an upload
    Status {
        upload_id: String,
    },
    /// Commit an upload whose chunks have all arrived
    Commit {
        upload_id: String,
        #[arg(long)]
        object_name: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Discard an uncommitted upload
    Abandon {
        upload_id: String,
    },
    /// Download a committed object
    Download {
        object_name: String,
        /// Destination file
        path: PathBuf,
    },
    /// Check server health and version
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        server,
        retries,
        command,
    } = Cli::parse();

    let client = ApiClient::new(&server)?;
    let policy = RetryPolicy {
        max_retries: retries,
        ..RetryPolicy::default()
    };

    match command {
        Commands::Upload {
            file,
            upload_id,
            chunk_size,
            parallel,
            content_type,
            object_name,
            shuffle,
            wait_secs,
        } => {
            let options = UploadOptions {
                upload_id,
                chunk_size,
                parallel,
                shuffle,
                wait: Duration::from_secs(wait_secs),
                target: ChunkTarget {
                    object_name,
                    content_type,
                },
            };
            handle_upload_command(&client, policy, &file, options).await
        }
        Commands::Status { upload_id } => handle_status_command(&client, policy, &upload_id).await,
        Commands::Commit {
            upload_id,
            object_name,
            content_type,
        } => {
            let target = ChunkTarget {
                object_name,
                content_type,
            };
            let response = with_retry(policy, "commit", || client.commit(&upload_id, &target))
                .await?;
            println!("Upload {}: {}", response.upload_id, response.status);
            print_object(&response.object);
            Ok(())
        }
        Commands::Abandon { upload_id } => {
            let report =
                with_retry(policy, "abandon", || client.abandon(&upload_id)).await?;
            println!(
                "Abandoned {}: {} chunk records, {} staged blocks removed",
                report.upload_id, report.chunks_deleted, report.blocks_deleted
            );
            Ok(())
        }
        Commands::Download { object_name, path } => {
            let written = with_retry(policy, "download", || client.download(&object_name, &path))
                .await?;
            println!("Wrote {} to {}", format_bytes(written), path.display());
            Ok(())
        }
        Commands::Health => handle_health_command(&client, policy).await,
    }
}

struct UploadOptions {
    upload_id: Option<String>,
    chunk_size: Option<u64>,
    parallel: usize,
    shuffle: bool,
    wait: Duration,
    target: ChunkTarget,
}

/// One chunk of the file: its sequence key and byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkSpan {
    sequence_key: u64,
    offset: u64,
    len: u64,
}

/// Split `file_size` bytes into spans of `chunk_size`. The last span is the
/// final chunk.
fn plan_chunks(file_size: u64, chunk_size: u64) -> Vec<ChunkSpan> {
    if file_size == 0 || chunk_size == 0 {
        return Vec::new();
    }
    (0..file_size.div_ceil(chunk_size))
        .map(|sequence_key| {
            let offset = sequence_key * chunk_size;
            ChunkSpan {
                sequence_key,
                offset,
                len: chunk_size.min(file_size - offset),
            }
        })
        .collect()
}

fn default_upload_id(file: &Path) -> Result<String> {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("cannot derive an upload id from the file path; pass --upload-id")
}

async fn read_span(file: &mut tokio::fs::File, span: ChunkSpan) -> Result<Bytes> {
    let len = usize::try_from(span.len)
        .map_err(|_| anyhow::anyhow!("chunk size exceeds platform limits"))?;
    let mut data = vec![0u8; len];
    file.seek(std::io::SeekFrom::Start(span.offset)).await?;
    file.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

async fn handle_upload_command(
    client: &ApiClient,
    policy: RetryPolicy,
    file: &Path,
    options: UploadOptions,
) -> Result<()> {
    let upload_id = match options.upload_id {
        Some(id) => id,
        None => default_upload_id(file)?,
    };

    let capabilities = with_retry(policy, "capabilities", || client.capabilities()).await?;
    let chunk_size = options
        .chunk_size
        .unwrap_or(DEFAULT_CHUNK_SIZE.min(capabilities.max_chunk_size));
    if chunk_size == 0 || chunk_size > capabilities.max_chunk_size {
        anyhow::bail!(
            "chunk size {chunk_size} must be between 1 and the server limit {}",
            capabilities.max_chunk_size
        );
    }

    let file_size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("failed to stat {}", file.display()))?
        .len();
    let mut spans = plan_chunks(file_size, chunk_size);
    let Some(final_span) = spans.pop() else {
        anyhow::bail!("{} is empty; chunks must carry at least one byte", file.display());
    };
    if options.shuffle {
        spans.shuffle(&mut rand::rng());
    }

    println!(
        "Uploading {} ({}) as {} in {} chunks",
        file.display(),
        format_bytes(file_size),
        upload_id,
        spans.len() + 1
    );

    let mut reader = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let parallel = options.parallel.max(1);
    let target = &options.target;
    let upload_id = upload_id.as_str();
    let mut in_flight = FuturesUnordered::new();
    let mut committed: Option<ObjectInfo> = None;

    for span in spans {
        let data = read_span(&mut reader, span).await?;
        in_flight.push(async move {
            with_retry(policy, "chunk", || {
                client.put_chunk(upload_id, span.sequence_key, data.clone(), false, target)
            })
            .await
            .with_context(|| format!("chunk {} failed", span.sequence_key))
        });

        if in_flight.len() >= parallel
            && let Some(result) = in_flight.next().await
        {
            note_ack(result?, &mut committed);
        }
    }

    while let Some(result) = in_flight.next().await {
        note_ack(result?, &mut committed);
    }

    // The final chunk goes last so its arrival normally completes the upload.
    let data = read_span(&mut reader, final_span).await?;
    let ack = with_retry(policy, "final chunk", || {
        client.put_chunk(upload_id, final_span.sequence_key, data.clone(), true, target)
    })
    .await
    .context("final chunk failed")?;
    let status = ack.status.clone();
    note_ack(ack, &mut committed);

    let object = match committed {
        Some(object) => object,
        None if status == "commit_pending" => {
            wait_for_commit(client, policy, upload_id, options.wait).await?
        }
        None => {
            // Every chunk landed but none completed the upload, so drive it.
            with_retry(policy, "commit", || client.commit(upload_id, target))
                .await?
                .object
        }
    };

    println!("Committed:");
    print_object(&object);
    Ok(())
}

fn note_ack(ack: ChunkAck, committed: &mut Option<ObjectInfo>) {
    tracing::debug!(
        upload_id = %ack.upload_id,
        sequence_key = ack.sequence_key,
        block_id = %ack.block_id,
        status = %ack.status,
        "chunk acknowledged"
    );
    if let Some(object) = ack.object {
        committed.get_or_insert(object);
    }
}

async fn wait_for_commit(
    client: &ApiClient,
    policy: RetryPolicy,
    upload_id: &str,
    wait: Duration,
) -> Result<ObjectInfo> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let status = with_retry(policy, "status", || client.status(upload_id)).await?;
        if let Some(object) = status.object {
            return Ok(object);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "upload {upload_id} still {} after {}s; check later with `ferryctl status {upload_id}`",
                status.state,
                wait.as_secs()
            );
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn handle_status_command(
    client: &ApiClient,
    policy: RetryPolicy,
    upload_id: &str,
) -> Result<()> {
    let status = with_retry(policy, "status", || client.status(upload_id)).await?;

    println!("Upload:          {}", status.upload_id);
    println!("State:           {}", status.state);
    println!("Chunks received: {}", status.chunks_received);
    println!("Bytes received:  {}", format_bytes(status.bytes_received));
    match status.final_sequence {
        Some(key) => println!("Final key:       {key}"),
        None => println!("Final key:       (not received)"),
    }
    if !status.missing_keys.is_empty() {
        let keys: Vec<String> = status.missing_keys.iter().map(u64::to_string).collect();
        println!("Missing keys:    {}", keys.join(", "));
    }
    if let Some(object) = &status.object {
        print_object(object);
    }
    Ok(())
}

async fn handle_health_command(client: &ApiClient, policy: RetryPolicy) -> Result<()> {
    let health = client.health().await?;
    let capabilities = with_retry(policy, "capabilities", || client.capabilities()).await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));
    println!("API version: {}", capabilities.api_version);
    println!("Max chunk size: {}", format_bytes(capabilities.max_chunk_size));
    println!("Commit mode: {}", capabilities.commit_mode);
    println!("Default content type: {}", capabilities.default_content_type);
    println!("Storage backend: {}", capabilities.storage_backend);

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

fn print_object(object: &ObjectInfo) {
    println!("  Object:       {}", object.name);
    println!("  Content type: {}", object.content_type);
    println!(
        "  Size:         {} ({} blocks)",
        format_bytes(object.size_bytes),
        object.block_count
    );
    println!("  Final key:    {}", object.final_sequence);
    println!("  Committed at: {}", object.committed_at);
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_chunks_covers_file() {
        let spans = plan_chunks(10, 4);
        assert_eq!(
            spans,
            vec![
                ChunkSpan { sequence_key: 0, offset: 0, len: 4 },
                ChunkSpan { sequence_key: 1, offset: 4, len: 4 },
                ChunkSpan { sequence_key: 2, offset: 8, len: 2 },
            ]
        );
    }

    #[test]
    fn test_plan_chunks_exact_multiple_and_single() {
        assert_eq!(plan_chunks(8, 4).len(), 2);
        assert_eq!(plan_chunks(3, 4), vec![ChunkSpan { sequence_key: 0, offset: 0, len: 3 }]);
        assert!(plan_chunks(0, 4).is_empty());
    }

    #[test]
    fn test_default_upload_id_uses_file_name() {
        assert_eq!(
            default_upload_id(Path::new("/tmp/build/report.zip")).unwrap(),
            "report.zip"
        );
        assert!(default_upload_id(Path::new("/")).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[tokio::test]
    async fn test_read_span_reads_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"AABBCC").await.unwrap();

        let mut file = tokio::fs::File::open(&path).await.unwrap();
        let span = ChunkSpan { sequence_key: 1, offset: 2, len: 2 };
        assert_eq!(read_span(&mut file, span).await.unwrap(), Bytes::from("BB"));
    }
}
