//! Detection boxes drawn onto saved screenshots.

use crate::detection::BoundingBox;
use crate::error::FrameError;
use crate::frame::{FrameData, FrameFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::sync::Arc;
use tracing::trace;

pub const PERSON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const PHONE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Stroke width in pixels
const LINE_WIDTH: u32 = 2;

/// Decode `frame`, outline each box in its color and re-encode as JPEG.
/// Boxes that fall partly or wholly outside the image are clipped.
pub fn annotate_frame(
    frame: &FrameData,
    boxes: &[(BoundingBox, Rgb<u8>)],
    quality: u8,
) -> Result<Arc<Vec<u8>>, FrameError> {
    let mut img = decode_rgb(frame)?;

    for (bbox, color) in boxes {
        draw_box(&mut img, bbox, *color);
    }

    let mut buf = Vec::with_capacity(frame.data.len());
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .map_err(|e| FrameError::Encoding {
            details: e.to_string(),
        })?;

    trace!("Annotated frame {} with {} boxes", frame.id, boxes.len());
    Ok(Arc::new(buf))
}

fn decode_rgb(frame: &FrameData) -> Result<RgbImage, FrameError> {
    match frame.format {
        FrameFormat::Mjpeg => image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| FrameError::Encoding {
                details: format!("failed to decode frame {} for overlay: {}", frame.id, e),
            }),
        FrameFormat::Rgb24 => RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
            .ok_or_else(|| FrameError::InvalidSize {
                id: frame.id,
                expected: frame.width as usize * frame.height as usize * 3,
                actual: frame.data.len(),
            }),
    }
}

fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    if !bbox.is_valid() {
        return;
    }
    let x = bbox.x.round() as i32;
    let y = bbox.y.round() as i32;
    let width = bbox.width.round().max(1.0) as u32;
    let height = bbox.height.round().max(1.0) as u32;

    // Nested outlines, each one pixel inside the last
    for inset in 0..LINE_WIDTH {
        if width <= 2 * inset || height <= 2 * inset {
            break;
        }
        let rect = Rect::at(x + inset as i32, y + inset as i32)
            .of_size(width - 2 * inset, height - 2 * inset);
        draw_hollow_rect_mut(img, rect, color);
    }
}
