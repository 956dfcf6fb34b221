use super::FrameSource;
use crate::error::CameraError;
use crate::events::{EventBus, PipelineEvent};
use crate::frame::FrameData;
use crate::recovery::{FailureTracker, RecoveryAction, RecoveryPolicy};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns a [`FrameSource`] and republishes its newest frame to any number of readers.
///
/// Readers that fall behind skip straight to the latest frame; the task never
/// queues more than one.
pub struct CaptureTask {
    source: Box<dyn FrameSource>,
    tracker: FailureTracker,
    read_timeout: Duration,
    event_bus: EventBus,
}

impl CaptureTask {
    pub fn new(
        source: Box<dyn FrameSource>,
        policy: RecoveryPolicy,
        read_timeout: Duration,
        event_bus: EventBus,
    ) -> Self {
        let tracker = FailureTracker::new(source.name(), policy);
        Self {
            source,
            tracker,
            read_timeout,
            event_bus,
        }
    }

    /// Start capturing. `cancel` stops the task; `fatal` is cancelled if the
    /// source is lost for good so the owner can shut the pipeline down.
    ///
    /// The join handle yields the number of frames forwarded.
    pub fn spawn(
        self,
        cancel: CancellationToken,
        fatal: CancellationToken,
    ) -> (FrameFeed, JoinHandle<Result<u64, CameraError>>) {
        let (tx, rx) = watch::channel(None);
        let name = self.source.name();
        let handle = tokio::spawn(self.run(tx, cancel, fatal));
        (FrameFeed { name, rx }, handle)
    }

    async fn run(
        mut self,
        tx: watch::Sender<Option<FrameData>>,
        cancel: CancellationToken,
        fatal: CancellationToken,
    ) -> Result<u64, CameraError> {
        let name = self.source.name();
        info!("Capture started for {}", name);

        let result = self.capture_loop(&tx, &cancel).await;
        self.source.close().await;

        match &result {
            Ok(frames) => info!("Capture stopped for {} after {} frames", name, frames),
            Err(CameraError::Exhausted) => {
                info!("{} has no more frames", name);
                let _ = self.event_bus.publish(PipelineEvent::ShutdownRequested {
                    timestamp: SystemTime::now(),
                    reason: format!("{} exhausted", name),
                });
                fatal.cancel();
            }
            Err(e) => {
                let _ = self.event_bus.publish(PipelineEvent::FrameSourceFailed {
                    source: name.clone(),
                    error: e.to_string(),
                    timestamp: SystemTime::now(),
                });
                let _ = self.event_bus.publish(PipelineEvent::ShutdownRequested {
                    timestamp: SystemTime::now(),
                    reason: format!("{} lost: {}", name, e),
                });
                fatal.cancel();
            }
        }
        result
    }

    async fn capture_loop(
        &mut self,
        tx: &watch::Sender<Option<FrameData>>,
        cancel: &CancellationToken,
    ) -> Result<u64, CameraError> {
        let mut forwarded = 0u64;
        let mut last_id: Option<u64> = None;

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(forwarded),
                read = tokio::time::timeout(self.read_timeout, self.source.read_frame()) => read,
            };

            let error = match read {
                Ok(Ok(frame)) => {
                    self.tracker.record_success();
                    if last_id.map_or(false, |last| frame.id <= last) {
                        warn!(
                            "{} produced out-of-order frame {} after {:?}, dropping",
                            self.tracker.component(),
                            frame.id,
                            last_id
                        );
                        continue;
                    }
                    last_id = Some(frame.id);
                    forwarded += 1;
                    tx.send_replace(Some(frame));
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => CameraError::FrameTimeout {
                    timeout: self.read_timeout,
                },
            };

            if matches!(error, CameraError::Exhausted) {
                return Err(error);
            }

            match self
                .tracker
                .record_failure(&error, error.is_recoverable())
            {
                RecoveryAction::RetryAfterDelay(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(forwarded),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryAction::Fatal => return Err(error),
            }
        }
    }
}

/// Read side of a [`CaptureTask`]. Clones track what they have seen independently.
#[derive(Clone)]
pub struct FrameFeed {
    name: String,
    rx: watch::Receiver<Option<FrameData>>,
}

impl FrameFeed {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for a frame this reader has not seen yet.
    ///
    /// Returns [`CameraError::Disconnected`] once the capture task has stopped
    /// and every frame it forwarded has been read.
    pub async fn next_frame(&mut self, timeout: Duration) -> Result<FrameData, CameraError> {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Err(_) => Err(CameraError::FrameTimeout { timeout }),
            Ok(Err(_)) => {
                debug!("Frame feed {} closed", self.name);
                Err(CameraError::Disconnected)
            }
            Ok(Ok(())) => self
                .rx
                .borrow_and_update()
                .clone()
                .ok_or(CameraError::Disconnected),
        }
    }

    /// Most recent frame without waiting
    pub fn latest(&self) -> Option<FrameData> {
        self.rx.borrow().clone()
    }
}
