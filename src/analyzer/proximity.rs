use crate::config::ProximityConfig;
use crate::debounce::ConsecutiveMatch;
use crate::detection::{best_of, BoundingBox, Detection, ObjectClass, OverlapMethod};
use crate::state::SharedState;

use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Person/phone co-location measured on one analysed frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapSample {
    /// Always within [0, 1]
    pub overlap_ratio: f32,
    pub person: BoundingBox,
    pub phone: BoundingBox,
    pub person_confidence: f32,
    pub phone_confidence: f32,
    pub num_persons: usize,
    pub num_phones: usize,
    pub timestamp: SystemTime,
}

/// Payload of a confirm decision, handed to the event recorder
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub timestamp: SystemTime,
    /// The sample of the frame that completed the streak
    pub sample: OverlapSample,
    /// Length of the qualifying streak
    pub frame_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No qualifying overlap on this frame; the streak is empty
    None,
    /// Qualifying overlap, but no event yet (streak too short or cooldown running)
    Accumulating { consecutive: u32 },
    /// The streak reached the threshold outside the cooldown window
    Confirm(Confirmation),
}

impl Decision {
    pub fn is_confirm(&self) -> bool {
        matches!(self, Decision::Confirm(_))
    }
}

/// Temporal-consistency and cooldown state machine over per-frame detections.
///
/// Each qualifying frame extends a streak; any non-qualifying frame or gap empties it.
/// Once the streak reaches the threshold, the analyzer confirms as soon as the shared
/// cooldown window allows it and then starts a fresh streak. While the cooldown runs
/// the streak is kept, so a usage that lasts through the window confirms immediately
/// after it.
pub struct ProximityAnalyzer {
    streak: ConsecutiveMatch<()>,
    min_overlap_ratio: f32,
    method: OverlapMethod,
    state: Arc<SharedState>,
    frames_analyzed: u64,
    confirmations: u64,
}

impl ProximityAnalyzer {
    pub fn new(config: &ProximityConfig, state: Arc<SharedState>) -> Self {
        info!(
            "Proximity analyzer: threshold={} frames, min_overlap={:.2} ({:?}), cooldown={}s",
            config.temporal_consistency_frames,
            config.min_overlap_ratio,
            config.overlap_method,
            config.cooldown_seconds
        );

        Self {
            streak: ConsecutiveMatch::new(config.temporal_consistency_frames),
            min_overlap_ratio: config.min_overlap_ratio,
            method: config.overlap_method,
            state,
            frames_analyzed: 0,
            confirmations: 0,
        }
    }

    /// Feed one frame's detections
    pub fn analyze(&mut self, detections: &[Detection], timestamp: SystemTime) -> Decision {
        self.frames_analyzed += 1;

        let sample = match self.sample(detections, timestamp) {
            Some(sample) => sample,
            None => {
                self.reset_streak("person or phone missing");
                return Decision::None;
            }
        };

        if sample.overlap_ratio < self.min_overlap_ratio {
            trace!(
                "Overlap {:.3} below minimum {:.3}",
                sample.overlap_ratio,
                self.min_overlap_ratio
            );
            self.reset_streak("overlap below minimum");
            return Decision::None;
        }

        let consecutive = self.streak.record(());
        if !self.streak.is_satisfied() {
            debug!(
                "Qualifying frame {}/{} (overlap {:.3})",
                consecutive,
                self.streak.threshold(),
                sample.overlap_ratio
            );
            return Decision::Accumulating { consecutive };
        }

        let cooldown = self.state.cooldown();
        if !cooldown.has_elapsed_at(timestamp) {
            trace!(
                "Streak of {} held back by cooldown ({:?} left)",
                consecutive,
                cooldown.remaining_at(timestamp)
            );
            return Decision::Accumulating { consecutive };
        }

        self.streak.reset();
        self.confirmations += 1;
        info!(
            "Phone usage confirmed after {} consecutive frames (overlap {:.3})",
            consecutive, sample.overlap_ratio
        );

        Decision::Confirm(Confirmation {
            timestamp,
            sample,
            frame_count: consecutive,
        })
    }

    /// A frame the detector could not classify (failure or timeout)
    pub fn record_gap(&mut self) {
        self.reset_streak("detection gap");
    }

    /// Drop any partial streak, e.g. when monitoring stops
    pub fn reset(&mut self) {
        self.reset_streak("reset");
    }

    pub fn consecutive(&self) -> u32 {
        self.streak.count()
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    fn sample(&self, detections: &[Detection], timestamp: SystemTime) -> Option<OverlapSample> {
        let person = best_of(detections, &ObjectClass::Person)?;
        let phone = best_of(detections, &ObjectClass::Phone)?;

        Some(OverlapSample {
            overlap_ratio: self.method.ratio(&person.bbox, &phone.bbox),
            person: person.bbox,
            phone: phone.bbox,
            person_confidence: person.confidence,
            phone_confidence: phone.confidence,
            num_persons: count_class(detections, &ObjectClass::Person),
            num_phones: count_class(detections, &ObjectClass::Phone),
            timestamp,
        })
    }

    fn reset_streak(&mut self, reason: &str) {
        if self.streak.count() > 0 {
            debug!(
                "Streak of {} frames reset: {}",
                self.streak.count(),
                reason
            );
        }
        self.streak.reset();
    }
}

fn count_class(detections: &[Detection], class: &ObjectClass) -> usize {
    detections.iter().filter(|d| &d.class == class).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MonitoringState;
    use std::time::Duration;

    fn config(threshold: u32, cooldown_secs: u64, method: OverlapMethod) -> ProximityConfig {
        ProximityConfig {
            temporal_consistency_frames: threshold,
            cooldown_seconds: cooldown_secs,
            min_overlap_ratio: 0.3,
            overlap_method: method,
        }
    }

    fn analyzer(threshold: u32, cooldown_secs: u64) -> (ProximityAnalyzer, Arc<SharedState>) {
        let state = Arc::new(SharedState::new(
            MonitoringState::Active,
            Duration::from_secs(cooldown_secs),
        ));
        let analyzer = ProximityAnalyzer::new(
            &config(threshold, cooldown_secs, OverlapMethod::Containment),
            Arc::clone(&state),
        );
        (analyzer, state)
    }

    fn at_ms(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(ms)
    }

    fn person() -> Detection {
        Detection::new(
            ObjectClass::Person,
            0.9,
            BoundingBox::new(100.0, 50.0, 200.0, 400.0),
        )
    }

    fn phone_at(x: f32, y: f32) -> Detection {
        Detection::new(ObjectClass::Phone, 0.8, BoundingBox::new(x, y, 20.0, 40.0))
    }

    fn qualifying() -> Vec<Detection> {
        vec![person(), phone_at(180.0, 200.0)]
    }

    fn non_qualifying() -> Vec<Detection> {
        vec![person(), phone_at(600.0, 200.0)]
    }

    #[test]
    fn test_gap_resets_streak_and_confirms_on_tenth_qualifying_frame() {
        let (mut analyzer, _state) = analyzer(5, 10);
        let mut confirms = Vec::new();
        let mut qualifying_seen = 0;

        let frames: Vec<bool> = [vec![true; 4], vec![false], vec![true; 5]].concat();
        for (i, is_qualifying) in frames.iter().enumerate() {
            let detections = if *is_qualifying {
                qualifying_seen += 1;
                qualifying()
            } else {
                non_qualifying()
            };
            if let Decision::Confirm(c) = analyzer.analyze(&detections, at_ms(i as u64 * 100)) {
                confirms.push((qualifying_seen, c));
            }
        }

        assert_eq!(confirms.len(), 1);
        let (seen, confirmation) = &confirms[0];
        assert_eq!(*seen, 9);
        assert_eq!(confirmation.frame_count, 5);
        assert_eq!(confirmation.timestamp, at_ms(900));
        assert_eq!(analyzer.consecutive(), 0);
    }

    #[test]
    fn test_never_confirms_below_threshold() {
        let (mut analyzer, _state) = analyzer(5, 0);
        for round in 0..20u64 {
            for i in 0..4u64 {
                let decision = analyzer.analyze(&qualifying(), at_ms(round * 1000 + i * 100));
                assert!(!decision.is_confirm());
            }
            analyzer.record_gap();
        }
        assert_eq!(analyzer.confirmations(), 0);
    }

    #[test]
    fn test_missing_class_is_a_gap() {
        let (mut analyzer, _state) = analyzer(3, 10);
        analyzer.analyze(&qualifying(), at_ms(0));
        analyzer.analyze(&qualifying(), at_ms(100));
        assert_eq!(analyzer.analyze(&[person()], at_ms(200)), Decision::None);
        assert_eq!(analyzer.consecutive(), 0);
        assert_eq!(
            analyzer.analyze(&qualifying(), at_ms(300)),
            Decision::Accumulating { consecutive: 1 }
        );
    }

    #[test]
    fn test_cooldown_holds_streak_until_window_elapses() {
        let (mut analyzer, state) = analyzer(2, 10);
        state.try_reserve_commit(at_ms(0)).unwrap().complete();

        analyzer.analyze(&qualifying(), at_ms(1_000));
        let held = analyzer.analyze(&qualifying(), at_ms(2_000));
        assert_eq!(held, Decision::Accumulating { consecutive: 2 });

        let still_held = analyzer.analyze(&qualifying(), at_ms(9_999));
        assert_eq!(still_held, Decision::Accumulating { consecutive: 3 });

        let confirmed = analyzer.analyze(&qualifying(), at_ms(10_000));
        assert!(confirmed.is_confirm());
    }

    #[test]
    fn test_overlap_method_changes_sensitivity() {
        let state = Arc::new(SharedState::new(MonitoringState::Active, Duration::ZERO));
        let mut containment = ProximityAnalyzer::new(
            &config(1, 0, OverlapMethod::Containment),
            Arc::clone(&state),
        );
        let mut iou = ProximityAnalyzer::new(&config(1, 0, OverlapMethod::Iou), state);

        // Small phone fully inside a large person box
        assert!(containment.analyze(&qualifying(), at_ms(0)).is_confirm());
        assert_eq!(iou.analyze(&qualifying(), at_ms(0)), Decision::None);
    }

    #[test]
    fn test_highest_confidence_detections_are_used() {
        let (mut analyzer, _state) = analyzer(1, 0);
        let mut far_phone = phone_at(600.0, 200.0);
        far_phone.confidence = 0.3;
        let detections = vec![person(), far_phone, phone_at(180.0, 200.0)];

        match analyzer.analyze(&detections, at_ms(0)) {
            Decision::Confirm(c) => {
                assert_eq!(c.sample.phone.x, 180.0);
                assert_eq!(c.sample.num_phones, 2);
                assert_eq!(c.sample.num_persons, 1);
                assert!((0.0..=1.0).contains(&c.sample.overlap_ratio));
            }
            other => panic!("expected confirm, got {:?}", other),
        }
    }
}
