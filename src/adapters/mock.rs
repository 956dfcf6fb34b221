use super::{DetectionAdapter, GestureAdapter};
use crate::detection::Detection;
use crate::error::AdapterError;
use crate::frame::FrameData;
use crate::gesture::GestureObservation;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Replays a fixed script of results, one per call, for tests and dry runs.
/// Once the script runs out the fallback result is returned forever.
struct Script<T> {
    steps: Mutex<VecDeque<Result<T, AdapterError>>>,
    fallback: Result<T, AdapterError>,
    delay: Duration,
    calls: AtomicU64,
}

impl<T: Clone> Script<T> {
    fn new(steps: Vec<Result<T, AdapterError>>, fallback: Result<T, AdapterError>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    async fn next(&self) -> Result<T, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let step = self.steps.lock().pop_front();
        step.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Object detector that returns scripted detections
pub struct ScriptedDetectionAdapter {
    script: Script<Vec<Detection>>,
}

impl ScriptedDetectionAdapter {
    /// Each entry answers one `detect` call; afterwards no detections are returned
    pub fn new(steps: Vec<Result<Vec<Detection>, AdapterError>>) -> Self {
        Self {
            script: Script::new(steps, Ok(Vec::new())),
        }
    }

    /// Answer every call with the same detections
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self {
            script: Script::new(Vec::new(), Ok(detections)),
        }
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionAdapter for ScriptedDetectionAdapter {
    fn name(&self) -> &str {
        "scripted-detector"
    }

    async fn detect(&self, _frame: &FrameData) -> Result<Vec<Detection>, AdapterError> {
        self.script.next().await
    }
}

/// Gesture classifier that returns scripted observations
pub struct ScriptedGestureAdapter {
    script: Script<GestureObservation>,
}

impl ScriptedGestureAdapter {
    /// Each entry answers one `classify` call; afterwards no hand is reported
    pub fn new(steps: Vec<Result<GestureObservation, AdapterError>>) -> Self {
        Self {
            script: Script::new(steps, Ok(GestureObservation::none())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GestureAdapter for ScriptedGestureAdapter {
    fn name(&self) -> &str {
        "scripted-gesture"
    }

    async fn classify(&self, _frame: &FrameData) -> Result<GestureObservation, AdapterError> {
        self.script.next().await
    }
}
