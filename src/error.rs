use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhoneShamerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Frame source failures
#[derive(Error, Debug, Clone)]
pub enum CameraError {
    #[error("Failed to open camera device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },

    #[error("No frame received within {timeout:?}")]
    FrameTimeout { timeout: Duration },

    #[error("Camera disconnected")]
    Disconnected,

    #[error("Frame source exhausted")]
    Exhausted,

    #[error("Camera not available on this system")]
    NotAvailable,
}

/// Frame buffer conversion failures
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    #[error("JPEG encoding failed: {details}")]
    Encoding { details: String },

    #[error("Frame {id} has {actual} bytes, expected {expected}")]
    InvalidSize {
        id: u64,
        expected: usize,
        actual: usize,
    },
}

/// Failures talking to an external classifier
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("{adapter} request failed: {details}")]
    Request { adapter: String, details: String },

    #[error("{adapter} returned an invalid response: {details}")]
    InvalidResponse { adapter: String, details: String },

    #[error("{adapter} timed out after {timeout:?}")]
    Timeout { adapter: String, timeout: Duration },

    #[error("{adapter} unavailable: {details}")]
    Unavailable { adapter: String, details: String },

    #[error("Frame encoding failed: {details}")]
    Encoding { details: String },
}

/// Screenshot and event record persistence failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to write screenshot {path}: {details}")]
    ScreenshotWrite { path: String, details: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Event append failed, screenshot {reference} {disposition}: {source}")]
    AppendFailed {
        reference: String,
        disposition: &'static str,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Corrupt event record {id}: {details}")]
    CorruptRecord { id: String, details: String },

    #[error("Storage IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to touch path outside storage root: {path}")]
    InvalidPath { path: String },
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

impl PhoneShamerError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>, M: Into<String>>(component: S, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation can reasonably succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            PhoneShamerError::Camera(e) => e.is_recoverable(),
            PhoneShamerError::Adapter(e) => e.is_recoverable(),
            PhoneShamerError::Io(_) => true,
            PhoneShamerError::EventBus(_) => true,
            _ => false,
        }
    }
}

impl CameraError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CameraError::NotAvailable | CameraError::Exhausted | CameraError::Configuration { .. }
        )
    }
}

impl AdapterError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AdapterError::Encoding { .. })
    }
}

pub type Result<T> = std::result::Result<T, PhoneShamerError>;
