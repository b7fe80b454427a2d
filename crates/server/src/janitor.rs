//! Background sweep that abandons idle uncommitted uploads.

use crate::upload::UploadCoordinator;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Spawn the janitor. Each tick abandons up to one batch of uploads whose
/// newest chunk is older than `upload.abandon_after_secs`.
pub fn spawn_janitor(
    coordinator: Arc<UploadCoordinator>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match coordinator.abandon_stale(OffsetDateTime::now_utc()).await {
                Ok(0) => tracing::debug!("janitor found no stale uploads"),
                Ok(abandoned) => tracing::info!(abandoned, "janitor abandoned stale uploads"),
                Err(e) => tracing::warn!(error = %e, "janitor sweep failed"),
            }
        }
    })
}
