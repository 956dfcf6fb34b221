pub mod adapters;
pub mod analyzer;
pub mod app;
pub mod camera;
pub mod config;
pub mod debounce;
pub mod detection;
pub mod error;
pub mod events;
pub mod frame;
pub mod gesture;
pub mod overlay;
pub mod query;
pub mod recorder;
pub mod recovery;
pub mod state;
pub mod storage;

pub use adapters::{DetectionAdapter, GestureAdapter};
pub use analyzer::{Confirmation, Decision, ProximityAnalyzer};
pub use app::{ComponentState, Components, Orchestrator, ShutdownReason};
pub use camera::{CaptureTask, FrameFeed, FrameSource};
pub use config::AppConfig;
pub use detection::{BoundingBox, Detection, ObjectClass, OverlapMethod};
pub use error::{PhoneShamerError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, PipelineEvent};
pub use frame::{FrameData, FrameFormat};
pub use gesture::{GestureController, GestureKind, GestureObservation, Handedness};
pub use query::QueryHandle;
pub use recorder::{CommitOutcome, EventRecorder};
pub use state::{CooldownWindow, MonitoringState, SharedState, StateSnapshot};
pub use storage::{EventStore, ScreenshotWriter, StatsRange, UsageEvent, UsageStats};
