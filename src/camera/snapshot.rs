use super::FrameSource;
use crate::error::CameraError;
use crate::frame::{jpeg_dimensions, FrameData, FrameFormat};
use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tracing::trace;

/// Polls an HTTP endpoint that returns a single JPEG per request (IP cameras, phone apps)
pub struct SnapshotSource {
    url: String,
    client: reqwest::Client,
    next_id: u64,
}

impl SnapshotSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            url: url.to_string(),
            client,
            next_id: 0,
        })
    }

    fn stream_error(&self, e: impl std::fmt::Display) -> CameraError {
        CameraError::CaptureStream {
            details: format!("{}: {}", self.url, e),
        }
    }
}

#[async_trait]
impl FrameSource for SnapshotSource {
    fn name(&self) -> String {
        format!("snapshot {}", self.url)
    }

    async fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_connect() {
                CameraError::DeviceOpen {
                    device: self.url.clone(),
                    details: e.to_string(),
                }
            } else {
                self.stream_error(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.stream_error(format!("HTTP {}", status)));
        }

        let bytes = response.bytes().await.map_err(|e| self.stream_error(e))?;
        let (width, height) = jpeg_dimensions(&bytes).map_err(|e| self.stream_error(e))?;

        let id = self.next_id;
        self.next_id += 1;
        trace!("Snapshot {} ({}x{}, {} bytes)", id, width, height, bytes.len());

        Ok(FrameData::new(
            id,
            SystemTime::now(),
            bytes.to_vec(),
            width,
            height,
            FrameFormat::Mjpeg,
        ))
    }
}
