use crate::error::{PhoneShamerError, Result};
use crate::storage::{EventStore, ScreenshotWriter};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Remove events confirmed before `cutoff`. Rows go first so no row ever cites a
/// deleted screenshot; screenshots that fail to delete are only logged.
pub(crate) async fn prune_once(
    store: &Arc<dyn EventStore>,
    writer: &Arc<dyn ScreenshotWriter>,
    cutoff: DateTime<Utc>,
) -> Result<usize> {
    let store = Arc::clone(store);
    let writer = Arc::clone(writer);

    tokio::task::spawn_blocking(move || -> Result<usize> {
        let pruned = store.prune_before(cutoff)?;
        for event in &pruned {
            if let Err(e) = writer.discard(&event.screenshot) {
                warn!("Failed to remove screenshot {}: {}", event.screenshot, e);
            }
        }
        Ok(pruned.len())
    })
    .await
    .map_err(|e| PhoneShamerError::component("retention", e.to_string()))?
}

/// Prune every `interval` until cancelled
pub(crate) async fn run(
    store: Arc<dyn EventStore>,
    writer: Arc<dyn ScreenshotWriter>,
    retention_days: u32,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        "Retention cleanup every {:?}, keeping {} days",
        interval, retention_days
    );
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        match prune_once(&store, &writer, cutoff).await {
            Ok(0) => debug!("Retention: nothing older than {}", cutoff.to_rfc3339()),
            Ok(n) => info!("Retention: removed {} events older than {}", n, cutoff.to_rfc3339()),
            Err(e) => error!("Retention cleanup failed: {}", e),
        }
    }
}
