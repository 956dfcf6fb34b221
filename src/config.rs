use crate::detection::OverlapMethod;
use crate::state::MonitoringState;
use crate::storage::OrphanPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub camera: CameraConfig,
    /// Secondary capture source for the gesture loop; the primary source is shared when absent
    #[serde(default)]
    pub gesture_camera: Option<CameraConfig>,
    pub detection: DetectionConfig,
    pub proximity: ProximityConfig,
    pub gesture: GestureConfig,
    pub storage: StorageConfig,
    pub screenshot: ScreenshotConfig,
    pub logging: LoggingConfig,
    pub system: SystemConfig,
}

/// Where frames come from
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// V4L2 device through GStreamer (requires the `camera` feature)
    Device,
    /// HTTP JPEG snapshot endpoint
    Snapshot,
    /// Directory of JPEG files
    Replay,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: SourceKind,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Snapshot URL for `source = "snapshot"`
    #[serde(default)]
    pub snapshot_url: Option<String>,

    /// Frame directory for `source = "replay"`
    #[serde(default)]
    pub replay_dir: Option<String>,

    /// Restart from the first file once the replay directory is exhausted
    #[serde(default = "default_replay_loop")]
    pub replay_loop: bool,

    /// Upper bound for a single frame read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Consecutive read failures after which the source is considered lost
    #[serde(default = "default_camera_max_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Object detection endpoint (multipart JPEG upload, JSON response)
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,

    /// Detections below this confidence are dropped at the adapter boundary
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_detection_timeout_ms")]
    pub timeout_ms: u64,

    /// Process every Nth frame
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,

    /// Consecutive adapter failures after which detection is declared unavailable
    #[serde(default = "default_adapter_max_failures")]
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProximityConfig {
    /// Consecutive qualifying frames required before an event is confirmed
    #[serde(default = "default_temporal_frames")]
    pub temporal_consistency_frames: u32,

    /// Minimum spacing between two confirmed events
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Minimum overlap ratio for a frame to qualify
    #[serde(default = "default_min_overlap_ratio")]
    pub min_overlap_ratio: f32,

    #[serde(default = "default_overlap_method")]
    pub overlap_method: OverlapMethod,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GestureConfig {
    /// Run the gesture loop at all
    #[serde(default = "default_gesture_enabled")]
    pub enabled: bool,

    /// Gesture classifier endpoint (multipart JPEG upload, JSON response)
    #[serde(default = "default_gesture_endpoint")]
    pub endpoint: String,

    /// Consecutive matching observations required for a transition
    #[serde(default = "default_debounce_frames")]
    pub debounce_frames: u32,

    /// Observations below this confidence are ignored
    #[serde(default = "default_gesture_min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default_gesture_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_gesture_timeout_ms")]
    pub timeout_ms: u64,

    /// Observations are ignored for this long after a transition
    #[serde(default = "default_gesture_rearm_ms")]
    pub rearm_ms: u64,

    #[serde(default = "default_initial_state")]
    pub initial_state: MonitoringState,

    #[serde(default = "default_adapter_max_failures")]
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// SQLite database holding event records
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Root directory for screenshot artifacts
    #[serde(default = "default_screenshots_path")]
    pub screenshots_path: String,

    /// What happens to a screenshot whose event record could not be written
    #[serde(default = "default_orphan_policy")]
    pub orphan_policy: OrphanPolicy,

    /// Events older than this are pruned hourly; 0 keeps everything
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// IANA timezone used for date folders and daily/hourly aggregates
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScreenshotConfig {
    /// JPEG quality used when a frame needs encoding
    #[serde(default = "default_screenshot_quality")]
    pub quality: u8,

    /// Write a JSON sidecar next to each screenshot
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,

    /// Outline the person and phone boxes on the saved image
    #[serde(default = "default_annotate_screenshots")]
    pub annotate: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Per-component stop timeout
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl CameraConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ProximityConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

impl GestureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rearm(&self) -> Duration {
        Duration::from_millis(self.rearm_ms)
    }
}

impl StorageConfig {
    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|e| {
            ConfigError::Message(format!("Unknown storage timezone '{}': {}", self.timezone, e))
        })
    }
}

impl AppConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("phoneshamer.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.source", "device")?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.replay_loop", default_replay_loop())?
            .set_default("camera.read_timeout_ms", default_read_timeout_ms())?
            .set_default(
                "camera.max_consecutive_failures",
                default_camera_max_failures(),
            )?
            .set_default("camera.retry_base_delay_ms", default_retry_base_delay_ms())?
            .set_default("camera.retry_max_delay_ms", default_retry_max_delay_ms())?
            .set_default("detection.endpoint", default_detection_endpoint())?
            .set_default(
                "detection.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default("detection.timeout_ms", default_detection_timeout_ms())?
            .set_default("detection.frame_skip", default_frame_skip())?
            .set_default(
                "detection.max_consecutive_failures",
                default_adapter_max_failures(),
            )?
            .set_default(
                "proximity.temporal_consistency_frames",
                default_temporal_frames(),
            )?
            .set_default("proximity.cooldown_seconds", default_cooldown_seconds())?
            .set_default(
                "proximity.min_overlap_ratio",
                default_min_overlap_ratio() as f64,
            )?
            .set_default("proximity.overlap_method", "containment")?
            .set_default("gesture.enabled", default_gesture_enabled())?
            .set_default("gesture.endpoint", default_gesture_endpoint())?
            .set_default("gesture.debounce_frames", default_debounce_frames())?
            .set_default(
                "gesture.min_confidence",
                default_gesture_min_confidence() as f64,
            )?
            .set_default(
                "gesture.poll_interval_ms",
                default_gesture_poll_interval_ms(),
            )?
            .set_default("gesture.timeout_ms", default_gesture_timeout_ms())?
            .set_default("gesture.rearm_ms", default_gesture_rearm_ms())?
            .set_default("gesture.initial_state", "active")?
            .set_default(
                "gesture.max_consecutive_failures",
                default_adapter_max_failures(),
            )?
            .set_default("storage.database_path", default_database_path())?
            .set_default("storage.screenshots_path", default_screenshots_path())?
            .set_default("storage.orphan_policy", "delete")?
            .set_default("storage.retention_days", default_retention_days())?
            .set_default("storage.timezone", default_timezone())?
            .set_default("screenshot.quality", default_screenshot_quality() as u64)?
            .set_default("screenshot.save_metadata", default_save_metadata())?
            .set_default("screenshot.annotate", default_annotate_screenshots())?
            .set_default("logging.file_prefix", default_log_file_prefix())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.shutdown_timeout_secs",
                default_shutdown_timeout_secs(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // PHONESHAMER_PROXIMITY__COOLDOWN_SECONDS=30
            .add_source(
                Environment::with_prefix("PHONESHAMER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_camera("camera", &self.camera)?;
        if let Some(gesture_camera) = &self.gesture_camera {
            Self::validate_camera("gesture_camera", gesture_camera)?;
        }

        if self.detection.frame_skip == 0 {
            return Err(ConfigError::Message(
                "Detection frame_skip must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Message(
                "Detection confidence_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.detection.endpoint.trim().is_empty() {
            return Err(ConfigError::Message(
                "Detection endpoint must not be empty".to_string(),
            ));
        }

        if self.detection.timeout_ms == 0 || self.detection.max_consecutive_failures == 0 {
            return Err(ConfigError::Message(
                "Detection timeout_ms and max_consecutive_failures must be greater than 0"
                    .to_string(),
            ));
        }

        if self.proximity.temporal_consistency_frames == 0 {
            return Err(ConfigError::Message(
                "Proximity temporal_consistency_frames must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.proximity.min_overlap_ratio) {
            return Err(ConfigError::Message(
                "Proximity min_overlap_ratio must be within [0, 1]".to_string(),
            ));
        }

        if self.gesture.enabled {
            if self.gesture.debounce_frames == 0 {
                return Err(ConfigError::Message(
                    "Gesture debounce_frames must be greater than 0".to_string(),
                ));
            }

            if !(0.0..=1.0).contains(&self.gesture.min_confidence) {
                return Err(ConfigError::Message(
                    "Gesture min_confidence must be within [0, 1]".to_string(),
                ));
            }

            if self.gesture.endpoint.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Gesture endpoint must not be empty".to_string(),
                ));
            }

            if self.gesture.timeout_ms == 0 || self.gesture.max_consecutive_failures == 0 {
                return Err(ConfigError::Message(
                    "Gesture timeout_ms and max_consecutive_failures must be greater than 0"
                        .to_string(),
                ));
            }
        }

        if self.screenshot.quality == 0 || self.screenshot.quality > 100 {
            return Err(ConfigError::Message(
                "Screenshot quality must be within 1..=100".to_string(),
            ));
        }

        self.storage.timezone()?;

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_camera(section: &str, camera: &CameraConfig) -> Result<(), ConfigError> {
        if camera.resolution.0 == 0 || camera.resolution.1 == 0 {
            return Err(ConfigError::Message(format!(
                "{} resolution must be greater than 0",
                section
            )));
        }

        if camera.fps == 0 {
            return Err(ConfigError::Message(format!(
                "{} fps must be greater than 0",
                section
            )));
        }

        if camera.read_timeout_ms == 0 || camera.max_consecutive_failures == 0 {
            return Err(ConfigError::Message(format!(
                "{} read_timeout_ms and max_consecutive_failures must be greater than 0",
                section
            )));
        }

        match camera.source {
            SourceKind::Snapshot if camera.snapshot_url.is_none() => {
                Err(ConfigError::Message(format!(
                    "{} source 'snapshot' requires snapshot_url",
                    section
                )))
            }
            SourceKind::Replay if camera.replay_dir.is_none() => Err(ConfigError::Message(
                format!("{} source 'replay' requires replay_dir", section),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            index: default_camera_index(),
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            snapshot_url: None,
            replay_dir: None,
            replay_loop: default_replay_loop(),
            read_timeout_ms: default_read_timeout_ms(),
            max_consecutive_failures: default_camera_max_failures(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            gesture_camera: None,
            detection: DetectionConfig {
                endpoint: default_detection_endpoint(),
                confidence_threshold: default_confidence_threshold(),
                timeout_ms: default_detection_timeout_ms(),
                frame_skip: default_frame_skip(),
                max_consecutive_failures: default_adapter_max_failures(),
            },
            proximity: ProximityConfig {
                temporal_consistency_frames: default_temporal_frames(),
                cooldown_seconds: default_cooldown_seconds(),
                min_overlap_ratio: default_min_overlap_ratio(),
                overlap_method: default_overlap_method(),
            },
            gesture: GestureConfig {
                enabled: default_gesture_enabled(),
                endpoint: default_gesture_endpoint(),
                debounce_frames: default_debounce_frames(),
                min_confidence: default_gesture_min_confidence(),
                poll_interval_ms: default_gesture_poll_interval_ms(),
                timeout_ms: default_gesture_timeout_ms(),
                rearm_ms: default_gesture_rearm_ms(),
                initial_state: default_initial_state(),
                max_consecutive_failures: default_adapter_max_failures(),
            },
            storage: StorageConfig {
                database_path: default_database_path(),
                screenshots_path: default_screenshots_path(),
                orphan_policy: default_orphan_policy(),
                retention_days: default_retention_days(),
                timezone: default_timezone(),
            },
            screenshot: ScreenshotConfig {
                quality: default_screenshot_quality(),
                save_metadata: default_save_metadata(),
                annotate: default_annotate_screenshots(),
            },
            logging: LoggingConfig {
                directory: None,
                file_prefix: default_log_file_prefix(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                shutdown_timeout_secs: default_shutdown_timeout_secs(),
            },
        }
    }
}

// Default value functions
fn default_camera_source() -> SourceKind {
    SourceKind::Device
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_replay_loop() -> bool {
    false
}
fn default_read_timeout_ms() -> u64 {
    2000
}
fn default_camera_max_failures() -> u32 {
    10
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_detection_endpoint() -> String {
    "http://127.0.0.1:8500/v1/detect".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_detection_timeout_ms() -> u64 {
    1500
}
fn default_frame_skip() -> u32 {
    3
}
fn default_adapter_max_failures() -> u32 {
    20
}

fn default_temporal_frames() -> u32 {
    5
}
fn default_cooldown_seconds() -> u64 {
    10
}
fn default_min_overlap_ratio() -> f32 {
    0.1
}
fn default_overlap_method() -> OverlapMethod {
    OverlapMethod::Containment
}

fn default_gesture_enabled() -> bool {
    true
}
fn default_gesture_endpoint() -> String {
    "http://127.0.0.1:8500/v1/gesture".to_string()
}
fn default_debounce_frames() -> u32 {
    3
}
fn default_gesture_min_confidence() -> f32 {
    0.5
}
fn default_gesture_poll_interval_ms() -> u64 {
    100
}
fn default_gesture_timeout_ms() -> u64 {
    1000
}
fn default_gesture_rearm_ms() -> u64 {
    1000
}
fn default_initial_state() -> MonitoringState {
    MonitoringState::Active
}

fn default_database_path() -> String {
    "./data/phoneshamer.db".to_string()
}
fn default_screenshots_path() -> String {
    "./data/screenshots".to_string()
}
fn default_orphan_policy() -> OrphanPolicy {
    OrphanPolicy::Delete
}
fn default_retention_days() -> u32 {
    30
}
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_screenshot_quality() -> u8 {
    95
}
fn default_save_metadata() -> bool {
    true
}
fn default_annotate_screenshots() -> bool {
    true
}

fn default_log_file_prefix() -> String {
    "phoneshamer.log".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
