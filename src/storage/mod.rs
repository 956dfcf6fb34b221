//! Persistence of confirmed usage events: screenshot artifacts plus one database row each.

mod screenshot;
mod sqlite;
mod stats;

pub use screenshot::{FsScreenshotWriter, ScreenshotMetadata};
pub use sqlite::SqliteEventStore;
pub use stats::{aggregate, StatsRange, UsageStats};

use crate::detection::BoundingBox;
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted usage event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub confirmed_at: DateTime<Utc>,
    pub person: BoundingBox,
    pub phone: BoundingBox,
    pub overlap_ratio: f32,
    pub frame_count: u32,
    /// Screenshot reference as returned by the [`ScreenshotWriter`]
    pub screenshot: String,
}

/// What happens to a written screenshot when its event row cannot be appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Remove the artifact and its sidecar
    #[default]
    Delete,
    /// Leave the artifact on disk for manual reconciliation
    Retain,
}

/// Durable, append-only event log with aggregate queries
pub trait EventStore: Send + Sync {
    /// Append one event. Failures are returned as-is and never retried here.
    fn append(&self, event: &UsageEvent) -> Result<(), StorageError>;

    fn query_aggregates(&self, range: &StatsRange) -> Result<UsageStats, StorageError>;

    /// Most recent events first
    fn recent_events(&self, limit: usize) -> Result<Vec<UsageEvent>, StorageError>;

    /// Events with `start <= confirmed_at < end`, oldest first
    fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, StorageError>;

    /// Delete events confirmed before `cutoff` and return them
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<UsageEvent>, StorageError>;
}

/// Writes screenshot artifacts and hands back a reference to cite in the event row
pub trait ScreenshotWriter: Send + Sync {
    fn write(&self, jpeg: &[u8], metadata: &ScreenshotMetadata) -> Result<String, StorageError>;

    /// Remove an artifact (and anything written alongside it). Missing files are not an error.
    fn discard(&self, reference: &str) -> Result<(), StorageError>;
}
