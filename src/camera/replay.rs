use super::FrameSource;
use crate::error::CameraError;
use crate::frame::{jpeg_dimensions, FrameData, FrameFormat};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

/// Plays back a fixed list of JPEG frames at a steady rate.
///
/// Used for offline runs against recorded footage and by the pipeline tests.
pub struct ReplaySource {
    name: String,
    frames: Vec<(Arc<Vec<u8>>, u32, u32)>,
    interval: Duration,
    looping: bool,
    position: usize,
    next_id: u64,
    next_due: Option<Instant>,
}

impl ReplaySource {
    /// Load every `.jpg`/`.jpeg` file in `dir`, in file name order
    pub fn from_dir<P: AsRef<Path>>(
        dir: P,
        interval: Duration,
        looping: bool,
    ) -> Result<Self, CameraError> {
        let dir = dir.as_ref();
        let device = dir.display().to_string();
        let open_error = |details: String| CameraError::DeviceOpen {
            device: device.clone(),
            details,
        };

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| open_error(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let bytes = std::fs::read(path)
                .map_err(|e| open_error(format!("{}: {}", path.display(), e)))?;
            frames.push(bytes);
        }

        if frames.is_empty() {
            return Err(CameraError::Configuration {
                details: format!("No JPEG files in replay directory {}", device),
            });
        }

        info!("Loaded {} replay frames from {}", frames.len(), device);
        Self::from_frames(format!("replay {}", device), frames, interval, looping)
    }

    /// Replay in-memory JPEG frames
    pub fn from_frames(
        name: impl Into<String>,
        frames: Vec<Vec<u8>>,
        interval: Duration,
        looping: bool,
    ) -> Result<Self, CameraError> {
        let frames = frames
            .into_iter()
            .map(|bytes| {
                let (width, height) =
                    jpeg_dimensions(&bytes).map_err(|e| CameraError::Configuration {
                        details: e.to_string(),
                    })?;
                Ok((Arc::new(bytes), width, height))
            })
            .collect::<Result<Vec<_>, CameraError>>()?;

        Ok(Self {
            name: name.into(),
            frames,
            interval,
            looping,
            position: 0,
            next_id: 0,
            next_due: None,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        if let Some(due) = self.next_due {
            tokio::time::sleep_until(due).await;
        }
        self.next_due = Some(Instant::now() + self.interval);

        if self.position >= self.frames.len() {
            if !self.looping || self.frames.is_empty() {
                return Err(CameraError::Exhausted);
            }
            debug!("{} wrapped around", self.name);
            self.position = 0;
        }

        let (data, width, height) = &self.frames[self.position];
        self.position += 1;

        let id = self.next_id;
        self.next_id += 1;

        Ok(FrameData {
            id,
            timestamp: SystemTime::now(),
            data: Arc::clone(data),
            width: *width,
            height: *height,
            format: FrameFormat::Mjpeg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let data = vec![shade; (width * height * 3) as usize];
        let frame = FrameData::new(0, SystemTime::now(), data, width, height, FrameFormat::Rgb24);
        frame.to_jpeg(80).unwrap().as_ref().clone()
    }

    #[tokio::test]
    async fn test_replay_plays_in_order_then_exhausts() {
        let mut source = ReplaySource::from_frames(
            "test",
            vec![test_jpeg(16, 8, 10), test_jpeg(32, 16, 200)],
            Duration::from_millis(1),
            false,
        )
        .unwrap();

        let first = source.read_frame().await.unwrap();
        assert_eq!((first.id, first.width, first.height), (0, 16, 8));
        let second = source.read_frame().await.unwrap();
        assert_eq!((second.id, second.width, second.height), (1, 32, 16));
        assert!(matches!(
            source.read_frame().await,
            Err(CameraError::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_looping_replay_keeps_ids_increasing() {
        let mut source = ReplaySource::from_frames(
            "loop",
            vec![test_jpeg(8, 8, 1)],
            Duration::from_millis(1),
            true,
        )
        .unwrap();

        for expected in 0..4 {
            assert_eq!(source.read_frame().await.unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn test_from_dir_sorts_and_filters() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.jpg"), test_jpeg(24, 8, 5)).unwrap();
        std::fs::write(dir.path().join("a.JPEG"), test_jpeg(8, 8, 5)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let mut source = ReplaySource::from_dir(dir.path(), Duration::ZERO, false).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.read_frame().await.unwrap().width, 8);
        assert_eq!(source.read_frame().await.unwrap().width, 24);
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            ReplaySource::from_dir(dir.path(), Duration::ZERO, false),
            Err(CameraError::Configuration { .. })
        ));
    }

    #[test]
    fn test_non_jpeg_frames_are_rejected() {
        assert!(ReplaySource::from_frames(
            "bad",
            vec![b"not a jpeg".to_vec()],
            Duration::ZERO,
            false
        )
        .is_err());
    }
}
