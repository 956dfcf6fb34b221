use crate::config::GestureConfig;
use crate::debounce::ConsecutiveMatch;
use crate::gesture::{GestureKind, GestureObservation, Handedness};
use crate::state::{MonitoringState, SharedState};

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Debounced monitoring switch driven by right-hand gestures.
///
/// An open palm forces `Active`, a closed fist forces `Stopped`. A transition needs
/// `debounce_frames` consecutive qualifying observations of the same gesture.
/// Off-target, left-hand and low-confidence observations are skipped without touching
/// the streak; a qualifying observation of the other gesture restarts it. An observation
/// qualifies only when its confidence is strictly above `min_confidence`.
pub struct GestureController {
    streak: ConsecutiveMatch<MonitoringState>,
    min_confidence: f32,
    rearm: Duration,
    last_transition: Option<SystemTime>,
    state: Arc<SharedState>,
}

impl GestureController {
    pub fn new(config: &GestureConfig, state: Arc<SharedState>) -> Self {
        Self {
            streak: ConsecutiveMatch::new(config.debounce_frames),
            min_confidence: config.min_confidence,
            rearm: config.rearm(),
            last_transition: None,
            state,
        }
    }

    /// Feed one observation; returns the monitoring state after it
    pub fn observe(
        &mut self,
        observation: &GestureObservation,
        timestamp: SystemTime,
    ) -> MonitoringState {
        let current = self.state.monitoring();

        let target = match observation.kind {
            GestureKind::OpenPalm => MonitoringState::Active,
            GestureKind::ClosedFist => MonitoringState::Stopped,
            _ => return current,
        };

        if observation.handedness != Handedness::Right {
            trace!("Ignoring {:?} hand gesture", observation.handedness);
            return current;
        }

        if observation.confidence <= self.min_confidence {
            trace!(
                "Ignoring {:?} at confidence {:.2}",
                observation.kind,
                observation.confidence
            );
            return current;
        }

        if self.is_rearming(timestamp) {
            trace!("Ignoring {:?} during rearm interval", observation.kind);
            return current;
        }

        let count = self.streak.record(target);
        if !self.streak.is_satisfied() {
            debug!(
                "Gesture {:?} {}/{}",
                observation.kind,
                count,
                self.streak.threshold()
            );
            return current;
        }

        self.streak.reset();
        let previous = self.state.set_monitoring(target);
        if previous != target {
            self.last_transition = Some(timestamp);
            info!("Monitoring {} -> {} by gesture", previous, target);
        } else {
            debug!("Gesture confirmed {} but monitoring already {}", target, previous);
        }

        target
    }

    pub fn monitoring(&self) -> MonitoringState {
        self.state.monitoring()
    }

    pub fn last_transition(&self) -> Option<SystemTime> {
        self.last_transition
    }

    fn is_rearming(&mut self, timestamp: SystemTime) -> bool {
        let Some(last) = self.last_transition else {
            return false;
        };
        match timestamp.duration_since(last) {
            Ok(since) => since < self.rearm,
            Err(_) => {
                // Clock stepped back: restart the lockout here so it never exceeds `rearm`
                debug!("Gesture timestamp went backwards, restarting rearm interval");
                self.last_transition = Some(timestamp);
                !self.rearm.is_zero()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(
        k: u32,
        initial: MonitoringState,
        rearm_ms: u64,
    ) -> (GestureController, Arc<SharedState>) {
        let mut config = crate::config::AppConfig::default().gesture;
        config.debounce_frames = k;
        config.rearm_ms = rearm_ms;
        let state = Arc::new(SharedState::new(initial, Duration::from_secs(10)));
        (GestureController::new(&config, Arc::clone(&state)), state)
    }

    fn right(kind: GestureKind) -> GestureObservation {
        GestureObservation::new(kind, 0.9, Handedness::Right)
    }

    fn at_ms(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(ms)
    }

    #[test]
    fn test_isolated_fist_resets_open_palm_streak() {
        let (mut controller, state) = controller(3, MonitoringState::Stopped, 0);
        let sequence = [
            GestureKind::OpenPalm,
            GestureKind::OpenPalm,
            GestureKind::ClosedFist,
            GestureKind::OpenPalm,
            GestureKind::OpenPalm,
            GestureKind::OpenPalm,
        ];

        let mut states = Vec::new();
        for (i, kind) in sequence.into_iter().enumerate() {
            states.push(controller.observe(&right(kind), at_ms(i as u64 * 100)));
        }

        assert_eq!(
            states,
            vec![
                MonitoringState::Stopped,
                MonitoringState::Stopped,
                MonitoringState::Stopped,
                MonitoringState::Stopped,
                MonitoringState::Stopped,
                MonitoringState::Active,
            ]
        );
        assert_eq!(state.monitoring(), MonitoringState::Active);
    }

    #[test]
    fn test_single_noisy_frame_never_toggles() {
        let (mut controller, state) = controller(2, MonitoringState::Active, 0);
        let pattern = [
            GestureKind::ClosedFist,
            GestureKind::OpenPalm,
            GestureKind::ClosedFist,
            GestureKind::OpenPalm,
        ];
        for (i, kind) in pattern.into_iter().cycle().take(20).enumerate() {
            controller.observe(&right(kind), at_ms(i as u64 * 100));
        }
        assert_eq!(state.monitoring(), MonitoringState::Active);
    }

    #[test]
    fn test_ignored_observations_keep_streak() {
        let (mut controller, state) = controller(3, MonitoringState::Active, 0);
        controller.observe(&right(GestureKind::ClosedFist), at_ms(0));
        // Left hand, low confidence, unrelated label: all skipped
        controller.observe(
            &GestureObservation::new(GestureKind::OpenPalm, 0.95, Handedness::Left),
            at_ms(100),
        );
        controller.observe(
            &GestureObservation::new(GestureKind::OpenPalm, 0.2, Handedness::Right),
            at_ms(200),
        );
        controller.observe(&right(GestureKind::Other("thumb-up".into())), at_ms(300));
        controller.observe(&GestureObservation::none(), at_ms(400));
        controller.observe(&right(GestureKind::ClosedFist), at_ms(500));
        assert_eq!(state.monitoring(), MonitoringState::Active);

        controller.observe(&right(GestureKind::ClosedFist), at_ms(600));
        assert_eq!(state.monitoring(), MonitoringState::Stopped);
    }

    #[test]
    fn test_repeated_transition_is_noop() {
        let (mut controller, state) = controller(1, MonitoringState::Active, 0);
        assert_eq!(
            controller.observe(&right(GestureKind::OpenPalm), at_ms(0)),
            MonitoringState::Active
        );
        assert!(controller.last_transition().is_none());
        assert_eq!(state.monitoring(), MonitoringState::Active);
    }

    #[test]
    fn test_rearm_interval_ignores_observations_after_transition() {
        let (mut controller, state) = controller(1, MonitoringState::Active, 1000);
        controller.observe(&right(GestureKind::ClosedFist), at_ms(0));
        assert_eq!(state.monitoring(), MonitoringState::Stopped);

        controller.observe(&right(GestureKind::OpenPalm), at_ms(500));
        assert_eq!(state.monitoring(), MonitoringState::Stopped);

        controller.observe(&right(GestureKind::OpenPalm), at_ms(1000));
        assert_eq!(state.monitoring(), MonitoringState::Active);
    }

    #[test]
    fn test_clock_stepping_back_bounds_rearm_lockout() {
        let (mut controller, state) = controller(1, MonitoringState::Active, 1000);
        controller.observe(&right(GestureKind::ClosedFist), at_ms(60_000));
        assert_eq!(state.monitoring(), MonitoringState::Stopped);

        // Wall clock jumps back a minute
        controller.observe(&right(GestureKind::OpenPalm), at_ms(0));
        assert_eq!(state.monitoring(), MonitoringState::Stopped);
        controller.observe(&right(GestureKind::OpenPalm), at_ms(500));
        assert_eq!(state.monitoring(), MonitoringState::Stopped);

        controller.observe(&right(GestureKind::OpenPalm), at_ms(1000));
        assert_eq!(state.monitoring(), MonitoringState::Active);
    }

    #[test]
    fn test_confidence_at_threshold_is_ignored() {
        let (mut controller, state) = controller(1, MonitoringState::Active, 0);
        let min = crate::config::AppConfig::default().gesture.min_confidence;

        controller.observe(
            &GestureObservation::new(GestureKind::ClosedFist, min, Handedness::Right),
            at_ms(0),
        );
        assert_eq!(state.monitoring(), MonitoringState::Active);

        controller.observe(
            &GestureObservation::new(GestureKind::ClosedFist, min + 0.01, Handedness::Right),
            at_ms(100),
        );
        assert_eq!(state.monitoring(), MonitoringState::Stopped);
    }
}
