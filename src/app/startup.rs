use super::frame_loop::FrameLoop;
use super::gesture_loop::GestureLoop;
use super::{retention, ComponentState, Orchestrator};
use crate::analyzer::ProximityAnalyzer;
use crate::camera::CaptureTask;
use crate::error::Result;
use crate::gesture::GestureController;
use crate::recovery::{FailureTracker, RecoveryPolicy};
use std::sync::Arc;
use tracing::{info, warn};

impl Orchestrator {
    /// Register every component that will run
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing phoneshamer components");

        let gesture_enabled = self.gesture.is_some();
        let mut states = self.component_states.lock().await;
        states.insert("capture".to_string(), ComponentState::Stopped);
        states.insert("frame_loop".to_string(), ComponentState::Stopped);
        if gesture_enabled {
            states.insert("gesture_loop".to_string(), ComponentState::Stopped);
            if self.gesture_source.is_some() {
                states.insert("gesture_capture".to_string(), ComponentState::Stopped);
            }
        }
        if self.config.storage.retention_days > 0 {
            states.insert("retention".to_string(), ComponentState::Stopped);
        }
        drop(states);

        if !gesture_enabled && self.gesture_source.is_some() {
            warn!("Gesture camera configured but gesture control is disabled; ignoring it");
        }

        info!(
            "Monitoring starts {}, cooldown {:?}",
            self.state.monitoring(),
            self.config.proximity.cooldown()
        );
        Ok(())
    }

    /// Start capture, both loops and retention cleanup
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting phoneshamer pipeline");

        let source = self.source.take().ok_or_else(|| Self::missing("frame source"))?;

        self.set_component_state("capture", ComponentState::Starting)
            .await;
        let capture = CaptureTask::new(
            source,
            RecoveryPolicy::from_camera(&self.config.camera),
            self.config.camera.read_timeout(),
            self.event_bus.clone(),
        );
        let (feed, handle) =
            capture.spawn(self.cancellation_token.clone(), self.fatal_token.clone());
        self.capture_tasks.push(("capture".to_string(), handle));
        self.set_component_state("capture", ComponentState::Running)
            .await;

        // Frame loop
        self.set_component_state("frame_loop", ComponentState::Starting)
            .await;
        let detection = &self.config.detection;
        let frame_loop = FrameLoop {
            feed: feed.clone(),
            detector: Arc::clone(&self.detector),
            analyzer: ProximityAnalyzer::new(&self.config.proximity, Arc::clone(&self.state)),
            recorder: Arc::clone(&self.recorder),
            state: Arc::clone(&self.state),
            event_bus: self.event_bus.clone(),
            frame_skip: detection.frame_skip,
            read_timeout: self.config.camera.read_timeout(),
            detect_timeout: detection.timeout(),
            failures: FailureTracker::new(
                "detector",
                RecoveryPolicy {
                    max_consecutive_failures: detection.max_consecutive_failures,
                    ..RecoveryPolicy::default()
                },
            ),
        };
        self.frame_task = Some(tokio::spawn(frame_loop.run(
            self.cancellation_token.clone(),
            self.fatal_token.clone(),
        )));
        self.set_component_state("frame_loop", ComponentState::Running)
            .await;

        // Gesture loop, on its own camera if one is configured
        if let Some(adapter) = self.gesture.clone() {
            self.set_component_state("gesture_loop", ComponentState::Starting)
                .await;

            let (gesture_feed, read_timeout) = match self.gesture_source.take() {
                Some(source) => {
                    let camera_config = self
                        .config
                        .gesture_camera
                        .clone()
                        .unwrap_or_else(|| self.config.camera.clone());
                    let capture = CaptureTask::new(
                        source,
                        RecoveryPolicy::from_camera(&camera_config),
                        camera_config.read_timeout(),
                        self.event_bus.clone(),
                    );
                    let (gesture_feed, handle) =
                        capture.spawn(self.cancellation_token.clone(), self.fatal_token.clone());
                    self.capture_tasks
                        .push(("gesture_capture".to_string(), handle));
                    self.set_component_state("gesture_capture", ComponentState::Running)
                        .await;
                    (gesture_feed, camera_config.read_timeout())
                }
                None => (feed, self.config.camera.read_timeout()),
            };

            let gesture = &self.config.gesture;
            let gesture_loop = GestureLoop {
                feed: gesture_feed,
                adapter,
                controller: GestureController::new(gesture, Arc::clone(&self.state)),
                event_bus: self.event_bus.clone(),
                poll_interval: gesture.poll_interval(),
                read_timeout,
                classify_timeout: gesture.timeout(),
                failures: FailureTracker::new(
                    "gesture classifier",
                    RecoveryPolicy {
                        max_consecutive_failures: gesture.max_consecutive_failures,
                        ..RecoveryPolicy::default()
                    },
                ),
            };
            self.gesture_task = Some(tokio::spawn(
                gesture_loop.run(self.cancellation_token.clone()),
            ));
            self.set_component_state("gesture_loop", ComponentState::Running)
                .await;
        }

        if self.config.storage.retention_days > 0 {
            self.retention_task = Some(tokio::spawn(retention::run(
                Arc::clone(&self.store),
                Arc::clone(&self.writer),
                self.config.storage.retention_days,
                retention::RETENTION_INTERVAL,
                self.cancellation_token.clone(),
            )));
            self.set_component_state("retention", ComponentState::Running)
                .await;
        }

        info!("phoneshamer pipeline started");
        Ok(())
    }
}
