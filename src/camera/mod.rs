mod capture;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst;
mod replay;
mod snapshot;

pub use capture::{CaptureTask, FrameFeed};
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gst::GstCameraSource;
pub use replay::ReplaySource;
pub use snapshot::SnapshotSource;

use crate::config::{CameraConfig, SourceKind};
use crate::error::CameraError;
use crate::frame::FrameData;
use async_trait::async_trait;

/// Anything that produces frames for the analysis loops.
///
/// Sources are owned by a single [`CaptureTask`]; the loops only ever see the
/// frames it forwards through a [`FrameFeed`].
#[async_trait]
pub trait FrameSource: Send {
    /// Short human readable name used in logs and events
    fn name(&self) -> String;

    /// Read the next frame. Implementations may block until one is available;
    /// callers bound the wait themselves.
    async fn read_frame(&mut self) -> Result<FrameData, CameraError>;

    /// Release the underlying device. Called once on every exit path.
    async fn close(&mut self) {}
}

/// Build the frame source described by `config`
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    match config.source {
        SourceKind::Device => open_device(config),
        SourceKind::Snapshot => {
            let url = config
                .snapshot_url
                .as_deref()
                .ok_or_else(|| CameraError::Configuration {
                    details: "snapshot source requires snapshot_url".to_string(),
                })?;
            Ok(Box::new(SnapshotSource::new(url, config.read_timeout())?))
        }
        SourceKind::Replay => {
            let dir = config
                .replay_dir
                .as_deref()
                .ok_or_else(|| CameraError::Configuration {
                    details: "replay source requires replay_dir".to_string(),
                })?;
            Ok(Box::new(ReplaySource::from_dir(
                dir,
                config.frame_interval(),
                config.replay_loop,
            )?))
        }
    }
}

#[cfg(all(target_os = "linux", feature = "camera"))]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Ok(Box::new(GstCameraSource::open(config)?))
}

#[cfg(not(all(target_os = "linux", feature = "camera")))]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    tracing::error!(
        "Camera device {} requested but this build has no camera support (enable the `camera` feature)",
        config.index
    );
    Err(CameraError::NotAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_source_requires_url() {
        let config = CameraConfig {
            source: SourceKind::Snapshot,
            snapshot_url: None,
            ..CameraConfig::default()
        };
        assert!(matches!(
            open_source(&config),
            Err(CameraError::Configuration { .. })
        ));
    }

    #[test]
    fn test_replay_source_requires_directory() {
        let config = CameraConfig {
            source: SourceKind::Replay,
            replay_dir: None,
            ..CameraConfig::default()
        };
        assert!(matches!(
            open_source(&config),
            Err(CameraError::Configuration { .. })
        ));
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn test_device_source_without_camera_support() {
        let config = CameraConfig::default();
        assert!(matches!(
            open_source(&config),
            Err(CameraError::NotAvailable)
        ));
    }
}
