use super::FrameSource;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// V4L2 camera read through a GStreamer MJPEG pipeline
pub struct GstCameraSource {
    device: String,
    resolution: (u32, u32),
    read_timeout: Duration,
    pipeline: Pipeline,
    samples: mpsc::Receiver<gstreamer::Sample>,
    next_id: u64,
    closed: bool,
}

impl GstCameraSource {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let device = format!("/dev/video{}", config.index);
        info!(
            "Opening camera {} ({}x{} @ {}fps)",
            device, config.resolution.0, config.resolution.1, config.fps
        );

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = Self::pipeline_string(config);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Sink element is not an AppSink".to_string(),
            })?;

        // Small queue: the capture task only cares about the newest frames
        let (tx, samples) = mpsc::channel(4);
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    if tx.try_send(sample).is_err() {
                        trace!("Sample queue full, dropping sample");
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::DeviceOpen {
                device: device.clone(),
                details: format!("Failed to start pipeline: {}", e),
            })?;

        Ok(Self {
            device,
            resolution: config.resolution,
            read_timeout: config.read_timeout(),
            pipeline,
            samples,
            next_id: 0,
            closed: false,
        })
    }

    fn pipeline_string(config: &CameraConfig) -> String {
        let (width, height) = config.resolution;
        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=4 drop=true qos=false enable-last-sample=false emit-signals=false",
            config.index, width, height, config.fps
        )
    }

    fn sample_to_frame(&mut self, sample: gstreamer::Sample) -> Result<FrameData, CameraError> {
        let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
            details: "No buffer in sample".to_string(),
        })?;

        // MJPEG caps carry width/height but are not raw video, so read the structure directly
        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| {
                let width = s.get::<i32>("width").ok()?;
                let height = s.get::<i32>("height").ok()?;
                Some((width.max(0) as u32, height.max(0) as u32))
            })
            .unwrap_or(self.resolution);

        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::CaptureStream {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let id = self.next_id;
        self.next_id += 1;

        trace!(
            "Captured MJPEG frame {} ({}x{}, {} bytes)",
            id,
            width,
            height,
            map.len()
        );

        Ok(FrameData::new(
            id,
            SystemTime::now(),
            map.as_slice().to_vec(),
            width,
            height,
            FrameFormat::Mjpeg,
        ))
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                return Some(err.error().to_string());
            }
        }
        None
    }
}

#[async_trait]
impl FrameSource for GstCameraSource {
    fn name(&self) -> String {
        format!("camera {}", self.device)
    }

    async fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        if self.closed {
            return Err(CameraError::Disconnected);
        }

        match tokio::time::timeout(self.read_timeout, self.samples.recv()).await {
            Ok(Some(sample)) => self.sample_to_frame(sample),
            Ok(None) => Err(CameraError::Disconnected),
            Err(_) => match self.bus_error() {
                Some(details) => Err(CameraError::CaptureStream { details }),
                None => Err(CameraError::FrameTimeout {
                    timeout: self.read_timeout,
                }),
            },
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.samples.close();
        match self.pipeline.set_state(gstreamer::State::Null) {
            Ok(_) => info!("Camera {} closed", self.device),
            Err(e) => warn!("Failed to stop pipeline for {}: {}", self.device, e),
        }
    }
}

impl Drop for GstCameraSource {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }
}
