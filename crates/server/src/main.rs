//! Ferry server binary.

use anyhow::{Context, Result};
use clap::Parser;
use ferry_core::config::AppConfig;
use ferry_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ferry - chunked upload coordinator
#[derive(Parser, Debug)]
#[command(name = "ferryd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FERRY_CONFIG", default_value = "config/server.toml")]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `FERRY_*`
/// environment variables (`__` separates nested keys).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("FERRY_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Ferry v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    ferry_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let blocks = ferry_storage::block_store_from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;

    // Refuse to accept chunks that could not be staged.
    blocks
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = blocks.backend_name(), "Storage backend ready");

    let metadata = ferry_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store ready");

    let state = AppState::new(config.clone(), blocks, metadata);
    tracing::info!(
        node_id = state.coordinator.assembler().node_id(),
        commit_mode = ?config.upload.commit_mode,
        "Upload coordinator ready"
    );

    if let Some(interval) = state.janitor_interval() {
        ferry_server::janitor::spawn_janitor(state.coordinator.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            abandon_after_secs = config.upload.abandon_after_secs,
            "Stale upload janitor spawned"
        );
    } else {
        tracing::info!("Stale upload janitor disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_from_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9000"

[storage]
type = "filesystem"
path = "/var/lib/ferry/storage"

[upload]
commit_mode = "deferred"
default_content_type = "application/zip"
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(
            config.upload.commit_mode,
            ferry_core::config::CommitMode::Deferred
        );
        assert_eq!(config.upload.default_content_type, "application/zip");
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[upload]
store_timeout_secs = 60
commit_lease_secs = 10
"#,
        )
        .unwrap();

        let err = load_config(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("commit_lease_secs"));
    }
}
