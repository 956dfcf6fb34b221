use super::types::FrameLoopStats;
use crate::adapters::DetectionAdapter;
use crate::analyzer::{Decision, ProximityAnalyzer};
use crate::camera::FrameFeed;
use crate::error::{AdapterError, CameraError};
use crate::events::{EventBus, PipelineEvent};
use crate::recorder::{CommitOutcome, EventRecorder};
use crate::recovery::{FailureTracker, RecoveryAction};
use crate::state::{MonitoringState, SharedState};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Detection side of the pipeline: frame -> detector -> proximity analyzer -> recorder
pub(crate) struct FrameLoop {
    pub(crate) feed: FrameFeed,
    pub(crate) detector: Arc<dyn DetectionAdapter>,
    pub(crate) analyzer: ProximityAnalyzer,
    pub(crate) recorder: Arc<EventRecorder>,
    pub(crate) state: Arc<SharedState>,
    pub(crate) event_bus: EventBus,
    pub(crate) frame_skip: u32,
    pub(crate) read_timeout: Duration,
    pub(crate) detect_timeout: Duration,
    pub(crate) failures: FailureTracker,
}

impl FrameLoop {
    /// Run until cancelled, the frame feed closes, or the detector is lost (which cancels `fatal`).
    /// A confirmation that is being committed when `cancel` fires is allowed to finish.
    pub(crate) async fn run(
        mut self,
        cancel: CancellationToken,
        fatal: CancellationToken,
    ) -> FrameLoopStats {
        info!("Frame loop started on {}", self.feed.name());
        let mut stats = FrameLoopStats::default();
        let frame_skip = u64::from(self.frame_skip.max(1));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.feed.next_frame(self.read_timeout) => next,
            };

            let frame = match next {
                Ok(frame) => frame,
                Err(CameraError::FrameTimeout { timeout }) => {
                    debug!("No frame within {:?}", timeout);
                    self.analyzer.record_gap();
                    stats.gaps += 1;
                    continue;
                }
                Err(e) => {
                    info!("Frame feed ended: {}", e);
                    break;
                }
            };

            stats.frames_seen += 1;
            if (stats.frames_seen - 1) % frame_skip != 0 {
                stats.frames_skipped += 1;
                continue;
            }

            if self.state.monitoring() == MonitoringState::Stopped {
                if self.analyzer.consecutive() > 0 {
                    debug!("Monitoring stopped, dropping partial streak");
                }
                self.analyzer.reset();
                continue;
            }

            let detected =
                tokio::time::timeout(self.detect_timeout, self.detector.detect(&frame)).await;

            let detections = match detected {
                Ok(Ok(detections)) => {
                    self.failures.record_success();
                    detections
                }
                Ok(Err(AdapterError::Timeout { timeout, .. })) => {
                    self.skip_timed_out(&mut stats, frame.id, timeout);
                    continue;
                }
                Ok(Err(e)) => {
                    self.analyzer.record_gap();
                    stats.gaps += 1;
                    match self.failures.record_failure(&e, e.is_recoverable()) {
                        RecoveryAction::RetryAfterDelay(delay) => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                        RecoveryAction::Fatal => {
                            let message = format!("{} lost: {}", self.detector.name(), e);
                            let _ = self.event_bus.publish(PipelineEvent::SystemError {
                                component: "frame_loop".to_string(),
                                error: message.clone(),
                            });
                            stats.fatal = Some(message);
                            fatal.cancel();
                            break;
                        }
                    }
                }
                Err(_) => {
                    self.skip_timed_out(&mut stats, frame.id, self.detect_timeout);
                    continue;
                }
            };

            stats.frames_analyzed += 1;
            trace!("Frame {}: {} detections", frame.id, detections.len());

            let confirmation = match self.analyzer.analyze(&detections, frame.timestamp) {
                Decision::Confirm(confirmation) => confirmation,
                Decision::Accumulating { .. } | Decision::None => continue,
            };

            match self.recorder.commit(&confirmation, &frame).await {
                Ok(CommitOutcome::Recorded(event)) => {
                    stats.events_recorded += 1;
                    debug!("Frame {} produced event {}", frame.id, event.id);
                }
                Ok(CommitOutcome::Suppressed(reason)) => {
                    stats.events_suppressed += 1;
                    debug!("Frame {} confirmation suppressed: {:?}", frame.id, reason);
                }
                Err(e) => {
                    stats.commit_failures += 1;
                    error!("Failed to record usage event: {}", e);
                }
            }
        }

        info!(
            "Frame loop stopped: {} frames seen, {} analyzed, {} events recorded",
            stats.frames_seen, stats.frames_analyzed, stats.events_recorded
        );
        stats
    }

    /// A detector timeout skips the frame. It breaks the streak but is not a failure.
    fn skip_timed_out(&mut self, stats: &mut FrameLoopStats, frame_id: u64, timeout: Duration) {
        warn!(
            "{} timed out after {:?}, skipping frame {}",
            self.detector.name(),
            timeout,
            frame_id
        );
        self.analyzer.record_gap();
        stats.gaps += 1;
        stats.detector_timeouts += 1;
    }
}
