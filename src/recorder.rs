//! Two-phase persistence of confirmed usage events.
//!
//! A commit reserves the cooldown window, writes the screenshot, then appends the
//! event row that cites it. The cooldown timestamp moves only after both writes
//! succeed. A failed append never leaves a row pointing at a missing file; what
//! happens to the orphaned screenshot is governed by [`OrphanPolicy`].

use crate::analyzer::Confirmation;
use crate::error::{PhoneShamerError, Result, StorageError};
use crate::events::{EventBus, PipelineEvent};
use crate::frame::FrameData;
use crate::overlay::{annotate_frame, PERSON_COLOR, PHONE_COLOR};
use crate::state::{ReserveDenied, SharedState};
use crate::storage::{EventStore, OrphanPolicy, ScreenshotMetadata, ScreenshotWriter, UsageEvent};

use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Recorded(UsageEvent),
    /// Nothing was written; the cooldown window or an in-flight commit refused it
    Suppressed(ReserveDenied),
}

pub struct EventRecorder {
    state: Arc<SharedState>,
    store: Arc<dyn EventStore>,
    writer: Arc<dyn ScreenshotWriter>,
    orphan_policy: OrphanPolicy,
    jpeg_quality: u8,
    annotate: bool,
    event_bus: EventBus,
}

impl EventRecorder {
    pub fn new(
        state: Arc<SharedState>,
        store: Arc<dyn EventStore>,
        writer: Arc<dyn ScreenshotWriter>,
        orphan_policy: OrphanPolicy,
        jpeg_quality: u8,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state,
            store,
            writer,
            orphan_policy,
            jpeg_quality,
            annotate: false,
            event_bus,
        }
    }

    /// Outline the person and phone boxes on saved screenshots
    pub fn with_annotation(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    /// Persist one confirmed event, at most once per cooldown window
    pub async fn commit(
        &self,
        confirmation: &Confirmation,
        frame: &FrameData,
    ) -> Result<CommitOutcome> {
        let permit = match self.state.try_reserve_commit(confirmation.timestamp) {
            Ok(permit) => permit,
            Err(denied) => {
                debug!("Commit suppressed: {:?}", denied);
                let remaining = match denied {
                    ReserveDenied::CoolingDown { remaining } => remaining,
                    ReserveDenied::InFlight => std::time::Duration::ZERO,
                };
                self.publish(PipelineEvent::UsageSuppressed {
                    timestamp: confirmation.timestamp,
                    remaining,
                });
                return Ok(CommitOutcome::Suppressed(denied));
            }
        };

        let result = self.write_both(confirmation, frame).await;
        match result {
            Ok(event) => {
                permit.complete();
                info!(
                    "Usage event {} recorded at {} ({} frames, overlap {:.3})",
                    event.id,
                    event.confirmed_at.to_rfc3339(),
                    event.frame_count,
                    event.overlap_ratio
                );
                self.publish(PipelineEvent::UsageRecorded {
                    event_id: event.id,
                    confirmed_at: confirmation.timestamp,
                    screenshot: event.screenshot.clone(),
                });
                Ok(CommitOutcome::Recorded(event))
            }
            Err(e) => {
                // Dropping the permit releases the window without moving the timestamp
                drop(permit);
                error!("Event commit failed: {}", e);
                self.publish(PipelineEvent::CommitFailed {
                    timestamp: confirmation.timestamp,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn write_both(
        &self,
        confirmation: &Confirmation,
        frame: &FrameData,
    ) -> Result<UsageEvent> {
        let id = Uuid::new_v4();
        let confirmed_at = DateTime::<Utc>::from(confirmation.timestamp).trunc_subsecs(3);
        let sample = &confirmation.sample;

        let metadata = ScreenshotMetadata {
            event_id: id,
            timestamp: confirmed_at,
            person_bbox: sample.person,
            phone_bbox: sample.phone,
            overlap_ratio: sample.overlap_ratio,
            frame_count: confirmation.frame_count,
            num_persons: sample.num_persons,
            num_phones: sample.num_phones,
        };

        // Phase one: the artifact
        let writer = Arc::clone(&self.writer);
        let frame = frame.clone();
        let quality = self.jpeg_quality;
        let boxes = self
            .annotate
            .then(|| [(sample.person, PERSON_COLOR), (sample.phone, PHONE_COLOR)]);
        let reference = tokio::task::spawn_blocking(move || -> Result<String> {
            let jpeg = match boxes {
                Some(boxes) => annotate_frame(&frame, &boxes, quality)?,
                None => frame.to_jpeg(quality)?,
            };
            Ok(writer.write(&jpeg, &metadata)?)
        })
        .await
        .map_err(|e| PhoneShamerError::system(format!("screenshot task failed: {}", e)))??;

        let event = UsageEvent {
            id,
            confirmed_at,
            person: sample.person,
            phone: sample.phone,
            overlap_ratio: sample.overlap_ratio,
            frame_count: confirmation.frame_count,
            screenshot: reference,
        };

        // Phase two: the row citing it
        let store = Arc::clone(&self.store);
        let row = event.clone();
        let appended = tokio::task::spawn_blocking(move || store.append(&row))
            .await
            .map_err(|e| PhoneShamerError::system(format!("append task failed: {}", e)))?;

        match appended {
            Ok(()) => Ok(event),
            Err(source) => Err(self.handle_orphan(&event.screenshot, source).await.into()),
        }
    }

    async fn handle_orphan(&self, reference: &str, source: StorageError) -> StorageError {
        let disposition = match self.orphan_policy {
            OrphanPolicy::Retain => {
                warn!(
                    "Event append failed, keeping screenshot {} for manual recovery",
                    reference
                );
                "retained"
            }
            OrphanPolicy::Delete => {
                let writer = Arc::clone(&self.writer);
                let owned = reference.to_string();
                let removed = tokio::task::spawn_blocking(move || writer.discard(&owned)).await;
                match removed {
                    Ok(Ok(())) => "deleted",
                    Ok(Err(e)) => {
                        warn!("Failed to delete orphaned screenshot {}: {}", reference, e);
                        "left behind after failed delete"
                    }
                    Err(e) => {
                        warn!("Orphan cleanup task failed for {}: {}", reference, e);
                        "left behind after failed delete"
                    }
                }
            }
        };

        StorageError::AppendFailed {
            reference: reference.to_string(),
            disposition,
            source: Box::new(source),
        }
    }

    fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.event_bus.publish(event) {
            debug!("Failed to publish recorder event: {}", e);
        }
    }

    pub fn last_commit(&self) -> Option<SystemTime> {
        self.state.cooldown().last_event
    }
}
