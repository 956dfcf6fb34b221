use super::{DetectionAdapter, GestureAdapter};
use crate::config::{DetectionConfig, GestureConfig};
use crate::detection::{BoundingBox, Detection, ObjectClass};
use crate::error::AdapterError;
use crate::frame::FrameData;
use crate::gesture::{GestureKind, GestureObservation, Handedness};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Detector response body
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    class_id: Option<u32>,
    confidence: f32,
    /// Corner coordinates `[x1, y1, x2, y2]`
    bbox: [f32; 4],
}

/// Gesture classifier response body
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    gesture: Option<String>,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    handedness: Option<String>,
}

/// Shared request plumbing: JPEG encode, multipart upload, JSON body
struct HttpEndpoint {
    name: String,
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    jpeg_quality: u8,
}

impl HttpEndpoint {
    fn new(
        name: &str,
        url: &str,
        timeout: Duration,
        jpeg_quality: u8,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Unavailable {
                adapter: name.to_string(),
                details: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            name: name.to_string(),
            client,
            url: url.to_string(),
            timeout,
            jpeg_quality,
        })
    }

    async fn post_frame(&self, frame: &FrameData) -> Result<String, AdapterError> {
        let jpeg = encode_off_thread(frame, self.jpeg_quality).await?;

        let part = Part::bytes(jpeg.as_ref().clone())
            .file_name(format!("frame_{}.jpg", frame.id))
            .mime_str("image/jpeg")
            .map_err(|e| self.request_error(e))?;
        let form = Form::new().part("image", part);

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Request {
                adapter: self.name.clone(),
                details: format!("{} - {}", status, body),
            });
        }

        resp.text().await.map_err(|e| self.request_error(e))
    }

    fn request_error(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout {
                adapter: self.name.clone(),
                timeout: self.timeout,
            }
        } else if e.is_connect() {
            AdapterError::Unavailable {
                adapter: self.name.clone(),
                details: e.to_string(),
            }
        } else {
            AdapterError::Request {
                adapter: self.name.clone(),
                details: e.to_string(),
            }
        }
    }

    fn invalid(&self, details: impl Into<String>) -> AdapterError {
        AdapterError::InvalidResponse {
            adapter: self.name.clone(),
            details: details.into(),
        }
    }
}

async fn encode_off_thread(frame: &FrameData, quality: u8) -> Result<Arc<Vec<u8>>, AdapterError> {
    if frame.format.is_compressed() {
        return frame.to_jpeg(quality).map_err(|e| AdapterError::Encoding {
            details: e.to_string(),
        });
    }

    let frame = frame.clone();
    tokio::task::spawn_blocking(move || frame.to_jpeg(quality))
        .await
        .map_err(|e| AdapterError::Encoding {
            details: format!("encoder task failed: {}", e),
        })?
        .map_err(|e| AdapterError::Encoding {
            details: e.to_string(),
        })
}

/// Object detector reached over HTTP
pub struct HttpDetectionAdapter {
    endpoint: HttpEndpoint,
    confidence_threshold: f32,
}

impl HttpDetectionAdapter {
    pub fn new(config: &DetectionConfig, jpeg_quality: u8) -> Result<Self, AdapterError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(
                "detector",
                &config.endpoint,
                config.timeout(),
                jpeg_quality,
            )?,
            confidence_threshold: config.confidence_threshold,
        })
    }

    /// Validate a detector response body into typed detections
    fn parse(&self, body: &str) -> Result<Vec<Detection>, AdapterError> {
        let response: DetectResponse = serde_json::from_str(body)
            .map_err(|e| self.endpoint.invalid(format!("malformed JSON: {}", e)))?;

        let mut detections = Vec::with_capacity(response.detections.len());
        for (i, wire) in response.detections.into_iter().enumerate() {
            if !wire.confidence.is_finite() || !(0.0..=1.0).contains(&wire.confidence) {
                return Err(self.endpoint.invalid(format!(
                    "detection {} has confidence {} outside [0, 1]",
                    i, wire.confidence
                )));
            }

            let class = match (&wire.label, wire.class_id) {
                (Some(label), _) => ObjectClass::from_label(label),
                (None, Some(id)) => ObjectClass::from_coco_id(id),
                (None, None) => {
                    return Err(self
                        .endpoint
                        .invalid(format!("detection {} has neither label nor class_id", i)))
                }
            };

            let [x1, y1, x2, y2] = wire.bbox;
            let bbox = BoundingBox::from_corners(x1, y1, x2, y2)
                .filter(BoundingBox::is_valid)
                .ok_or_else(|| {
                    self.endpoint
                        .invalid(format!("detection {} has invalid box {:?}", i, wire.bbox))
                })?;

            if wire.confidence < self.confidence_threshold {
                trace!(
                    "Dropping {} at confidence {:.2} (threshold {:.2})",
                    class,
                    wire.confidence,
                    self.confidence_threshold
                );
                continue;
            }

            detections.push(Detection::new(class, wire.confidence, bbox));
        }

        Ok(detections)
    }
}

#[async_trait]
impl DetectionAdapter for HttpDetectionAdapter {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    async fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, AdapterError> {
        let body = self.endpoint.post_frame(frame).await?;
        let detections = self.parse(&body)?;
        debug!("Frame {}: {} detections", frame.id, detections.len());
        Ok(detections)
    }
}

/// Gesture classifier reached over HTTP
pub struct HttpGestureAdapter {
    endpoint: HttpEndpoint,
}

impl HttpGestureAdapter {
    pub fn new(config: &GestureConfig, jpeg_quality: u8) -> Result<Self, AdapterError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(
                "gesture-classifier",
                &config.endpoint,
                config.timeout(),
                jpeg_quality,
            )?,
        })
    }

    fn parse(&self, body: &str) -> Result<GestureObservation, AdapterError> {
        let response: ClassifyResponse = serde_json::from_str(body)
            .map_err(|e| self.endpoint.invalid(format!("malformed JSON: {}", e)))?;

        let label = match response.gesture {
            Some(label) => label,
            None => return Ok(GestureObservation::none()),
        };

        if !response.confidence.is_finite() || !(0.0..=1.0).contains(&response.confidence) {
            return Err(self.endpoint.invalid(format!(
                "gesture confidence {} outside [0, 1]",
                response.confidence
            )));
        }

        let handedness = response
            .handedness
            .as_deref()
            .map(Handedness::from_label)
            .unwrap_or(Handedness::Unknown);

        Ok(GestureObservation::new(
            GestureKind::from_label(&label),
            response.confidence,
            handedness,
        ))
    }
}

#[async_trait]
impl GestureAdapter for HttpGestureAdapter {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    async fn classify(&self, frame: &FrameData) -> Result<GestureObservation, AdapterError> {
        let body = self.endpoint.post_frame(frame).await?;
        self.parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn detector() -> HttpDetectionAdapter {
        HttpDetectionAdapter::new(&AppConfig::default().detection, 90).unwrap()
    }

    fn gestures() -> HttpGestureAdapter {
        HttpGestureAdapter::new(&AppConfig::default().gesture, 90).unwrap()
    }

    #[test]
    fn test_parse_labels_and_class_ids() {
        let body = r#"{"detections":[
            {"label":"person","confidence":0.91,"bbox":[100,50,300,450]},
            {"class_id":67,"confidence":0.72,"bbox":[180,200,200,240]},
            {"label":"laptop","confidence":0.88,"bbox":[0,0,50,50]}
        ]}"#;

        let detections = detector().parse(body).unwrap();
        assert_eq!(detections.len(), 3);
        assert_eq!(detections[0].class, ObjectClass::Person);
        assert_eq!(detections[0].bbox, BoundingBox::new(100.0, 50.0, 200.0, 400.0));
        assert_eq!(detections[1].class, ObjectClass::Phone);
        assert_eq!(detections[1].bbox, BoundingBox::new(180.0, 200.0, 20.0, 40.0));
    }

    #[test]
    fn test_low_confidence_detections_are_dropped() {
        let body = r#"{"detections":[
            {"label":"cell phone","confidence":0.2,"bbox":[0,0,10,10]}
        ]}"#;
        assert!(detector().parse(body).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_detections_are_rejected() {
        let adapter = detector();
        for body in [
            r#"{"detections":[{"label":"person","confidence":1.5,"bbox":[0,0,10,10]}]}"#,
            r#"{"detections":[{"label":"person","confidence":0.9,"bbox":[10,0,5,10]}]}"#,
            r#"{"detections":[{"label":"person","confidence":0.9,"bbox":[0,0,0,10]}]}"#,
            r#"{"detections":[{"confidence":0.9,"bbox":[0,0,10,10]}]}"#,
            r#"not json"#,
        ] {
            assert!(
                matches!(
                    adapter.parse(body),
                    Err(AdapterError::InvalidResponse { .. })
                ),
                "accepted {}",
                body
            );
        }
    }

    #[test]
    fn test_missing_detections_field_is_empty() {
        assert!(detector().parse("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_gesture() {
        let adapter = gestures();
        let observation = adapter
            .parse(r#"{"gesture":"Open_Palm","confidence":0.87,"handedness":"Right"}"#)
            .unwrap();
        assert_eq!(observation.kind, GestureKind::OpenPalm);
        assert_eq!(observation.handedness, Handedness::Right);

        let none = adapter.parse(r#"{"gesture":null}"#).unwrap();
        assert_eq!(none.kind, GestureKind::None);

        assert!(adapter
            .parse(r#"{"gesture":"Closed_Fist","confidence":-0.1}"#)
            .is_err());
    }
}
