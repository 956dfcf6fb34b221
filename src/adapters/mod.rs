//! Clients for the external object detector and gesture classifier.
//!
//! Both classifiers are black boxes reached through the traits below. Their raw
//! output is validated into typed [`Detection`]s and [`GestureObservation`]s
//! before anything else in the crate sees it.

mod http;
mod mock;

pub use http::{HttpDetectionAdapter, HttpGestureAdapter};
pub use mock::{ScriptedDetectionAdapter, ScriptedGestureAdapter};

use crate::detection::Detection;
use crate::error::AdapterError;
use crate::frame::FrameData;
use crate::gesture::GestureObservation;
use async_trait::async_trait;

#[async_trait]
pub trait DetectionAdapter: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    async fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, AdapterError>;
}

#[async_trait]
pub trait GestureAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Classify the most prominent hand in the frame. A frame without a hand
    /// yields [`GestureObservation::none`].
    async fn classify(&self, frame: &FrameData) -> Result<GestureObservation, AdapterError>;
}
