use super::types::GestureLoopStats;
use crate::adapters::GestureAdapter;
use crate::camera::FrameFeed;
use crate::error::{AdapterError, CameraError};
use crate::events::{EventBus, PipelineEvent};
use crate::gesture::GestureController;
use crate::recovery::{FailureTracker, RecoveryAction};

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Gesture side of the pipeline: frame -> gesture classifier -> monitoring switch
pub(crate) struct GestureLoop {
    pub(crate) feed: FrameFeed,
    pub(crate) adapter: Arc<dyn GestureAdapter>,
    pub(crate) controller: GestureController,
    pub(crate) event_bus: EventBus,
    pub(crate) poll_interval: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) classify_timeout: Duration,
    pub(crate) failures: FailureTracker,
}

impl GestureLoop {
    /// Run until cancelled or the frame feed closes. Losing the classifier only
    /// ends this loop; monitoring keeps its current value.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> GestureLoopStats {
        info!(
            "Gesture loop started on {} (monitoring {})",
            self.feed.name(),
            self.controller.monitoring()
        );
        let mut stats = GestureLoopStats::default();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.feed.next_frame(self.read_timeout) => next,
            };

            let frame = match next {
                Ok(frame) => frame,
                Err(CameraError::FrameTimeout { .. }) => continue,
                Err(e) => {
                    info!("Gesture frame feed ended: {}", e);
                    break;
                }
            };

            let classified =
                tokio::time::timeout(self.classify_timeout, self.adapter.classify(&frame)).await;

            match classified {
                Ok(Ok(observation)) => {
                    self.failures.record_success();
                    stats.frames_classified += 1;

                    let before = self.controller.monitoring();
                    let after = self.controller.observe(&observation, frame.timestamp);
                    if before != after {
                        stats.transitions += 1;
                        let _ = self.event_bus.publish(PipelineEvent::MonitoringChanged {
                            state: after,
                            timestamp: SystemTime::now(),
                        });
                    }
                }
                Ok(Err(AdapterError::Timeout { timeout, .. })) => {
                    stats.timeouts += 1;
                    warn!(
                        "{} timed out after {:?}, skipping frame {}",
                        self.adapter.name(),
                        timeout,
                        frame.id
                    );
                }
                Ok(Err(e)) => {
                    stats.failures += 1;
                    if let RecoveryAction::Fatal =
                        self.failures.record_failure(&e, e.is_recoverable())
                    {
                        let message = format!("{} lost: {}", self.adapter.name(), e);
                        error!("Gesture control disabled: {}", message);
                        let _ = self.event_bus.publish(PipelineEvent::SystemError {
                            component: "gesture_loop".to_string(),
                            error: message.clone(),
                        });
                        stats.fatal = Some(message);
                        break;
                    }
                }
                Err(_) => {
                    stats.timeouts += 1;
                    warn!(
                        "{} timed out after {:?}, skipping frame {}",
                        self.adapter.name(),
                        self.classify_timeout,
                        frame.id
                    );
                }
            }

            if !self.poll_interval.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        debug!(
            "Gesture loop stopped: {} classified, {} transitions",
            stats.frames_classified, stats.transitions
        );
        stats
    }
}
