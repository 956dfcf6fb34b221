use crate::error::FrameError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Frame format enumeration supporting different video formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// A captured frame. `id` is a per-source sequence number that only grows.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared between the loops that read it)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// JPEG bytes for this frame. MJPEG frames are passed through untouched.
    pub fn to_jpeg(&self, quality: u8) -> Result<Arc<Vec<u8>>, FrameError> {
        match self.format {
            FrameFormat::Mjpeg => Ok(Arc::clone(&self.data)),
            FrameFormat::Rgb24 => {
                if let Some(expected) = self.expected_size() {
                    if self.data.len() != expected {
                        return Err(FrameError::InvalidSize {
                            id: self.id,
                            expected,
                            actual: self.data.len(),
                        });
                    }
                }

                let mut buf = Vec::with_capacity(self.data.len() / 8);
                let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
                encoder
                    .encode(&self.data, self.width, self.height, ColorType::Rgb8)
                    .map_err(|e| FrameError::Encoding {
                        details: e.to_string(),
                    })?;

                tracing::trace!(
                    "Encoded frame {} ({}x{}) to {} JPEG bytes",
                    self.id,
                    self.width,
                    self.height,
                    buf.len()
                );
                Ok(Arc::new(buf))
            }
        }
    }
}

/// Width and height of an encoded JPEG, read from its header
pub fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32), FrameError> {
    image::io::Reader::with_format(std::io::Cursor::new(bytes), image::ImageFormat::Jpeg)
        .into_dimensions()
        .map_err(|e| FrameError::Encoding {
            details: format!("unreadable JPEG header: {}", e),
        })
}
