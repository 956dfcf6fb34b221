use super::*;
use crate::adapters::{ScriptedDetectionAdapter, ScriptedGestureAdapter};
use crate::camera::ReplaySource;
use crate::config::AppConfig;
use crate::detection::{BoundingBox, Detection, ObjectClass};
use crate::error::AdapterError;
use crate::events::{EventFilter, PipelineEvent};
use crate::frame::{FrameData, FrameFormat};
use crate::gesture::{GestureKind, GestureObservation, Handedness};
use crate::state::MonitoringState;
use crate::storage::{
    EventStore, FsScreenshotWriter, ScreenshotMetadata, ScreenshotWriter, SqliteEventStore,
    UsageEvent,
};
use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use uuid::Uuid;

fn jpeg() -> Vec<u8> {
    let frame = FrameData::new(
        0,
        SystemTime::now(),
        vec![120u8; 32 * 24 * 3],
        32,
        24,
        FrameFormat::Rgb24,
    );
    frame.to_jpeg(80).unwrap().as_ref().clone()
}

fn replay(frames: usize, looping: bool) -> Box<ReplaySource> {
    Box::new(
        ReplaySource::from_frames(
            "test replay",
            vec![jpeg(); frames],
            Duration::from_millis(20),
            looping,
        )
        .unwrap(),
    )
}

fn phone_at_ear() -> Vec<Detection> {
    vec![
        Detection::new(
            ObjectClass::Person,
            0.92,
            BoundingBox::new(100.0, 40.0, 200.0, 400.0),
        ),
        Detection::new(
            ObjectClass::Phone,
            0.81,
            BoundingBox::new(180.0, 90.0, 30.0, 50.0),
        ),
    ]
}

fn create_test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.detection.frame_skip = 1;
    config.proximity.temporal_consistency_frames = 3;
    config.proximity.cooldown_seconds = 10;
    config.gesture.enabled = false;
    config.gesture.debounce_frames = 2;
    config.gesture.poll_interval_ms = 0;
    config.storage.database_path = dir.path().join("events.db").display().to_string();
    config.storage.screenshots_path = dir.path().join("shots").display().to_string();
    config.storage.retention_days = 0;
    config.system.shutdown_timeout_secs = 5;
    config.camera.read_timeout_ms = 500;
    config
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<SqliteEventStore>,
    writer: Arc<FsScreenshotWriter>,
}

fn harness(
    config: AppConfig,
    source: Box<ReplaySource>,
    detector: Arc<ScriptedDetectionAdapter>,
    gesture: Option<Arc<ScriptedGestureAdapter>>,
) -> Harness {
    let store = Arc::new(SqliteEventStore::open(&config.storage.database_path).unwrap());
    let writer = Arc::new(
        FsScreenshotWriter::new(&config.storage.screenshots_path, Tz::UTC, true).unwrap(),
    );

    let components = Components {
        source,
        gesture_source: None,
        detector,
        gesture: gesture.map(|g| g as Arc<dyn crate::adapters::GestureAdapter>),
        store: store.clone(),
        writer: writer.clone(),
    };

    Harness {
        orchestrator: Orchestrator::with_components(config, components).unwrap(),
        store,
        writer,
    }
}

#[tokio::test]
async fn test_pipeline_records_one_event_per_cooldown() {
    let dir = TempDir::new().unwrap();
    let detector = Arc::new(ScriptedDetectionAdapter::repeating(phone_at_ear()));
    let mut h = harness(
        create_test_config(&dir),
        replay(12, false),
        detector.clone(),
        None,
    );

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    let exit_code = h.orchestrator.run().await.unwrap();

    assert_eq!(exit_code, 0);
    assert_eq!(h.store.count().unwrap(), 1);
    assert!(detector.calls() >= 3);

    let stats = h.orchestrator.frame_loop_stats().unwrap();
    assert_eq!(stats.events_recorded, 1);
    assert_eq!(stats.commit_failures, 0);
    assert!(stats.fatal.is_none());

    let event = &h.store.recent_events(1).unwrap()[0];
    assert_eq!(event.frame_count, 3);
    assert!(h.writer.resolve(&event.screenshot).unwrap().exists());

    let query = h.orchestrator.query();
    assert_eq!(query.stats(1).await.unwrap().total_events, 1);
    assert!(query.snapshot().cooldown.last_event.is_some());
    assert!(!query.snapshot().commit_in_flight);
}

#[tokio::test]
async fn test_stopped_monitoring_never_calls_detector() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.gesture.initial_state = MonitoringState::Stopped;

    let detector = Arc::new(ScriptedDetectionAdapter::repeating(phone_at_ear()));
    let mut h = harness(config, replay(8, false), detector.clone(), None);

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    assert_eq!(detector.calls(), 0);
    assert_eq!(h.store.count().unwrap(), 0);
    assert_eq!(
        h.orchestrator.query().monitoring_state(),
        MonitoringState::Stopped
    );
}

#[tokio::test]
async fn test_open_palm_starts_monitoring() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.gesture.enabled = true;
    config.gesture.initial_state = MonitoringState::Stopped;

    let palm = || Ok(GestureObservation::new(GestureKind::OpenPalm, 0.9, Handedness::Right));
    let gesture = Arc::new(ScriptedGestureAdapter::new(vec![palm(), palm()]));
    let detector = Arc::new(ScriptedDetectionAdapter::repeating(phone_at_ear()));
    let mut h = harness(config, replay(30, false), detector, Some(gesture));

    let mut changes = h.orchestrator.event_bus().receiver(
        EventFilter::EventTypes(vec!["monitoring_changed"]),
        "test",
    );

    h.orchestrator.initialize().await.unwrap();
    assert_eq!(
        h.orchestrator.get_component_state("gesture_loop").await,
        Some(ComponentState::Stopped)
    );
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    assert_eq!(
        h.orchestrator.query().monitoring_state(),
        MonitoringState::Active
    );
    assert_eq!(h.orchestrator.gesture_loop_stats().unwrap().transitions, 1);
    assert_eq!(h.store.count().unwrap(), 1);

    match changes.try_recv().unwrap() {
        Some(PipelineEvent::MonitoringChanged { state, .. }) => {
            assert_eq!(state, MonitoringState::Active)
        }
        other => panic!("expected a monitoring change, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lost_detector_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.detection.max_consecutive_failures = 3;

    let refused = || {
        Err(AdapterError::Request {
            adapter: "detector".to_string(),
            details: "connection refused".to_string(),
        })
    };
    let detector = Arc::new(ScriptedDetectionAdapter::new(vec![
        refused(),
        refused(),
        refused(),
    ]));
    let mut h = harness(config, replay(1, true), detector, None);

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    let exit_code = h.orchestrator.run().await.unwrap();

    assert_eq!(exit_code, 1);
    assert!(h.orchestrator.frame_loop_stats().unwrap().fatal.is_some());
    assert_eq!(
        h.orchestrator.get_component_state("frame_loop").await,
        Some(ComponentState::Failed)
    );
    assert_eq!(h.store.count().unwrap(), 0);
}

fn timed_out(adapter: &str) -> AdapterError {
    AdapterError::Timeout {
        adapter: adapter.to_string(),
        timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_slow_detector_skips_frames_without_failing() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.detection.timeout_ms = 20;
    config.detection.max_consecutive_failures = 1;

    let detector = Arc::new(
        ScriptedDetectionAdapter::repeating(phone_at_ear()).with_delay(Duration::from_millis(80)),
    );
    let mut h = harness(config, replay(8, false), detector.clone(), None);

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    let stats = h.orchestrator.frame_loop_stats().unwrap();
    assert!(stats.fatal.is_none());
    assert!(stats.detector_timeouts >= 1);
    assert_eq!(stats.detector_timeouts, detector.calls());
    assert!(stats.gaps >= stats.detector_timeouts);
    assert_eq!(stats.frames_analyzed, 0);
    assert_eq!(h.store.count().unwrap(), 0);
    assert_eq!(
        h.orchestrator.get_component_state("frame_loop").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_detector_reported_timeout_is_a_skipped_frame() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.detection.max_consecutive_failures = 1;

    let detector = Arc::new(ScriptedDetectionAdapter::new(vec![
        Err(timed_out("detector")),
        Err(timed_out("detector")),
        Err(timed_out("detector")),
    ]));
    let mut h = harness(config, replay(10, false), detector.clone(), None);

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    let stats = h.orchestrator.frame_loop_stats().unwrap();
    assert!(stats.fatal.is_none());
    assert_eq!(stats.detector_timeouts, 3);
    assert!(stats.gaps >= 3);
    assert!(detector.calls() > 3);
    assert_eq!(
        h.orchestrator.get_component_state("frame_loop").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_slow_gesture_classifier_keeps_monitoring() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.gesture.enabled = true;
    config.gesture.timeout_ms = 20;
    config.gesture.max_consecutive_failures = 1;

    let fist = || Ok(GestureObservation::new(GestureKind::ClosedFist, 0.9, Handedness::Right));
    let gesture = Arc::new(
        ScriptedGestureAdapter::new(vec![fist(), fist(), fist()])
            .with_delay(Duration::from_millis(80)),
    );
    let detector = Arc::new(ScriptedDetectionAdapter::new(Vec::new()));
    let mut h = harness(config, replay(10, false), detector, Some(gesture));

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    let stats = h.orchestrator.gesture_loop_stats().unwrap();
    assert!(stats.fatal.is_none());
    assert!(stats.timeouts >= 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.transitions, 0);
    assert_eq!(
        h.orchestrator.query().monitoring_state(),
        MonitoringState::Active
    );
    assert_eq!(
        h.orchestrator.get_component_state("gesture_loop").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_gesture_reported_timeout_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.gesture.enabled = true;
    config.gesture.initial_state = MonitoringState::Stopped;
    config.gesture.max_consecutive_failures = 1;

    let palm = || Ok(GestureObservation::new(GestureKind::OpenPalm, 0.9, Handedness::Right));
    let gesture = Arc::new(ScriptedGestureAdapter::new(vec![
        Err(timed_out("gesture classifier")),
        Err(timed_out("gesture classifier")),
        palm(),
        palm(),
    ]));
    let detector = Arc::new(ScriptedDetectionAdapter::new(Vec::new()));
    let mut h = harness(config, replay(12, false), detector, Some(gesture));

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    let stats = h.orchestrator.gesture_loop_stats().unwrap();
    assert!(stats.fatal.is_none());
    assert_eq!(stats.timeouts, 2);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.transitions, 1);
    assert_eq!(
        h.orchestrator.query().monitoring_state(),
        MonitoringState::Active
    );
}

#[tokio::test]
async fn test_cancellation_stops_every_component() {
    let dir = TempDir::new().unwrap();
    let detector = Arc::new(ScriptedDetectionAdapter::new(Vec::new()));
    let mut h = harness(create_test_config(&dir), replay(2, true), detector, None);

    h.orchestrator.initialize().await.unwrap();
    h.orchestrator.start().await.unwrap();

    let token = h.orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    assert_eq!(h.orchestrator.run().await.unwrap(), 0);

    let states = h.orchestrator.get_all_component_states().await;
    assert!(!states.is_empty());
    assert!(states.values().all(|s| *s == ComponentState::Stopped));
    assert!(h.orchestrator.frame_loop_stats().unwrap().frames_seen > 0);
}

#[tokio::test]
async fn test_retention_removes_rows_then_screenshots() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let store = Arc::new(SqliteEventStore::open(&config.storage.database_path).unwrap());
    let writer = Arc::new(FsScreenshotWriter::new(dir.path().join("shots"), Tz::UTC, false).unwrap());

    let mut saved = Vec::new();
    for age_days in [40, 1] {
        let confirmed_at = Utc::now() - ChronoDuration::days(age_days);
        let id = Uuid::new_v4();
        let person = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let phone = BoundingBox::new(2.0, 2.0, 3.0, 3.0);
        let reference = writer
            .write(
                b"jpeg",
                &ScreenshotMetadata {
                    event_id: id,
                    timestamp: confirmed_at,
                    person_bbox: person,
                    phone_bbox: phone,
                    overlap_ratio: 1.0,
                    frame_count: 3,
                    num_persons: 1,
                    num_phones: 1,
                },
            )
            .unwrap();
        let event = UsageEvent {
            id,
            confirmed_at,
            person,
            phone,
            overlap_ratio: 1.0,
            frame_count: 3,
            screenshot: reference,
        };
        store.append(&event).unwrap();
        saved.push(event);
    }

    let store_dyn: Arc<dyn EventStore> = store.clone();
    let writer_dyn: Arc<dyn ScreenshotWriter> = writer.clone();
    let removed = retention::prune_once(
        &store_dyn,
        &writer_dyn,
        Utc::now() - ChronoDuration::days(30),
    )
    .await
    .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(store.count().unwrap(), 1);
    assert!(!writer.resolve(&saved[0].screenshot).unwrap().exists());
    assert!(writer.resolve(&saved[1].screenshot).unwrap().exists());
}

#[tokio::test]
async fn test_component_state_management() {
    let dir = TempDir::new().unwrap();
    let detector = Arc::new(ScriptedDetectionAdapter::new(Vec::new()));
    let h = harness(create_test_config(&dir), replay(1, false), detector, None);
    let orchestrator = h.orchestrator;

    assert!(orchestrator.get_all_component_states().await.is_empty());

    orchestrator
        .set_component_state("capture", ComponentState::Starting)
        .await;
    orchestrator
        .set_component_state("frame_loop", ComponentState::Running)
        .await;
    assert_eq!(
        orchestrator.get_component_state("capture").await,
        Some(ComponentState::Starting)
    );
    assert!(!orchestrator.any_component_failed().await);

    orchestrator
        .set_component_state("capture", ComponentState::Failed)
        .await;
    assert!(orchestrator.any_component_failed().await);
    assert_eq!(orchestrator.get_all_component_states().await.len(), 2);
}

#[test]
fn test_shutdown_reason_display() {
    assert_eq!(
        ShutdownReason::Signal("SIGTERM".to_string()).to_string(),
        "signal SIGTERM"
    );
    assert_eq!(ShutdownReason::UserRequest.to_string(), "user request");
}
