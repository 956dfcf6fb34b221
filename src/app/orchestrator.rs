use super::types::{ComponentState, FrameLoopStats, GestureLoopStats, ShutdownReason};
use crate::adapters::{DetectionAdapter, GestureAdapter, HttpDetectionAdapter, HttpGestureAdapter};
use crate::camera::{self, FrameSource};
use crate::config::AppConfig;
use crate::error::{CameraError, PhoneShamerError, Result};
use crate::events::EventBus;
use crate::query::QueryHandle;
use crate::recorder::EventRecorder;
use crate::state::SharedState;
use crate::storage::{EventStore, FsScreenshotWriter, ScreenshotWriter, SqliteEventStore};

use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the pipeline talks to. Built from config in production and by hand in tests.
pub struct Components {
    pub source: Box<dyn FrameSource>,
    /// Separate camera for gestures; `None` shares `source`
    pub gesture_source: Option<Box<dyn FrameSource>>,
    pub detector: Arc<dyn DetectionAdapter>,
    /// `None` disables gesture control
    pub gesture: Option<Arc<dyn GestureAdapter>>,
    pub store: Arc<dyn EventStore>,
    pub writer: Arc<dyn ScreenshotWriter>,
}

impl Components {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let tz = config.storage.timezone()?;

        let store: Arc<dyn EventStore> =
            Arc::new(SqliteEventStore::open(&config.storage.database_path)?);
        let writer: Arc<dyn ScreenshotWriter> = Arc::new(FsScreenshotWriter::new(
            &config.storage.screenshots_path,
            tz,
            config.screenshot.save_metadata,
        )?);

        let detector: Arc<dyn DetectionAdapter> = Arc::new(HttpDetectionAdapter::new(
            &config.detection,
            config.screenshot.quality,
        )?);

        let gesture: Option<Arc<dyn GestureAdapter>> = if config.gesture.enabled {
            Some(Arc::new(HttpGestureAdapter::new(
                &config.gesture,
                config.screenshot.quality,
            )?))
        } else {
            None
        };

        let source = camera::open_source(&config.camera)?;
        let gesture_source = match (&config.gesture_camera, config.gesture.enabled) {
            (Some(camera_config), true) => Some(camera::open_source(camera_config)?),
            _ => None,
        };

        Ok(Self {
            source,
            gesture_source,
            detector,
            gesture,
            store,
            writer,
        })
    }
}

/// Owns the shared state and every task of the running pipeline
pub struct Orchestrator {
    pub(super) config: AppConfig,
    pub(super) tz: Tz,
    pub(super) event_bus: EventBus,
    pub(super) state: Arc<SharedState>,
    pub(super) store: Arc<dyn EventStore>,
    pub(super) writer: Arc<dyn ScreenshotWriter>,
    pub(super) recorder: Arc<EventRecorder>,
    pub(super) detector: Arc<dyn DetectionAdapter>,
    pub(super) gesture: Option<Arc<dyn GestureAdapter>>,

    // Sources are handed to their capture tasks on start
    pub(super) source: Option<Box<dyn FrameSource>>,
    pub(super) gesture_source: Option<Box<dyn FrameSource>>,

    // Tasks
    pub(super) capture_tasks: Vec<(String, JoinHandle<std::result::Result<u64, CameraError>>)>,
    pub(super) frame_task: Option<JoinHandle<FrameLoopStats>>,
    pub(super) gesture_task: Option<JoinHandle<GestureLoopStats>>,
    pub(super) retention_task: Option<JoinHandle<()>>,
    pub(super) frame_stats: Option<FrameLoopStats>,
    pub(super) gesture_stats: Option<GestureLoopStats>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
    /// Cancelled by a task that cannot continue
    pub(super) fatal_token: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with real devices, adapters and storage
    pub async fn new(config: AppConfig) -> Result<Self> {
        let components = Components::from_config(&config)?;
        Self::with_components(config, components)
    }

    pub fn with_components(config: AppConfig, components: Components) -> Result<Self> {
        let tz = config.storage.timezone()?;
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let state = Arc::new(SharedState::new(
            config.gesture.initial_state,
            config.proximity.cooldown(),
        ));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let recorder = Arc::new(EventRecorder::new(
            Arc::clone(&state),
            Arc::clone(&components.store),
            Arc::clone(&components.writer),
            config.storage.orphan_policy,
            config.screenshot.quality,
            event_bus.clone(),
        )
        .with_annotation(config.screenshot.annotate));

        info!(
            "Pipeline: source {}, detector {}, gesture {}",
            components.source.name(),
            components.detector.name(),
            components
                .gesture
                .as_ref()
                .map(|g| g.name().to_string())
                .unwrap_or_else(|| "disabled".to_string())
        );

        Ok(Self {
            config,
            tz,
            event_bus,
            state,
            store: components.store,
            writer: components.writer,
            recorder,
            detector: components.detector,
            gesture: components.gesture,
            source: Some(components.source),
            gesture_source: components.gesture_source,
            capture_tasks: Vec::new(),
            frame_task: None,
            gesture_task: None,
            retention_task: None,
            frame_stats: None,
            gesture_stats: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            fatal_token: CancellationToken::new(),
        })
    }

    /// Read-only view of the running pipeline
    pub fn query(&self) -> QueryHandle {
        QueryHandle::new(Arc::clone(&self.state), Arc::clone(&self.store), self.tz)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Cancelling this token stops the pipeline; [`Orchestrator::run`] then shuts down
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Frame loop counters, available after shutdown
    pub fn frame_loop_stats(&self) -> Option<&FrameLoopStats> {
        self.frame_stats.as_ref()
    }

    pub fn gesture_loop_stats(&self) -> Option<&GestureLoopStats> {
        self.gesture_stats.as_ref()
    }

    pub(super) fn missing(what: &str) -> PhoneShamerError {
        PhoneShamerError::system(format!("{} already taken", what))
    }
}
