use std::time::Duration;
use tracing::{error, warn};

/// Recovery action to take after a failed operation
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry after a delay
    RetryAfterDelay(Duration),
    /// Give up; the component cannot continue
    Fatal,
}

/// Retry/backoff policy for a component that must keep working
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Consecutive failures tolerated before the component is declared lost
    pub max_consecutive_failures: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            exponential_backoff: true,
        }
    }
}

impl RecoveryPolicy {
    pub fn from_camera(config: &crate::config::CameraConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            exponential_backoff: true,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }

        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Counts consecutive failures of one component against a [`RecoveryPolicy`]
#[derive(Debug)]
pub struct FailureTracker {
    component: String,
    policy: RecoveryPolicy,
    consecutive: u32,
}

impl FailureTracker {
    pub fn new(component: impl Into<String>, policy: RecoveryPolicy) -> Self {
        Self {
            component: component.into(),
            policy,
            consecutive: 0,
        }
    }

    /// Register a failure and decide what to do next. Non-recoverable errors are fatal at once.
    pub fn record_failure<E: std::fmt::Display>(
        &mut self,
        error: &E,
        recoverable: bool,
    ) -> RecoveryAction {
        self.consecutive = self.consecutive.saturating_add(1);

        if !recoverable {
            error!("Non-recoverable error in {}: {}", self.component, error);
            return RecoveryAction::Fatal;
        }

        if self.consecutive >= self.policy.max_consecutive_failures {
            error!(
                "{} failed {} times in a row, giving up: {}",
                self.component, self.consecutive, error
            );
            return RecoveryAction::Fatal;
        }

        let delay = self.policy.delay_for(self.consecutive - 1);
        warn!(
            "{} failure {}/{} ({}), retrying in {:?}",
            self.component, self.consecutive, self.policy.max_consecutive_failures, error, delay
        );
        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Register a success; returns true if this ended a failure streak
    pub fn record_success(&mut self) -> bool {
        let recovered = self.consecutive > 0;
        if recovered {
            tracing::info!(
                "{} recovered after {} consecutive failures",
                self.component,
                self.consecutive
            );
        }
        self.consecutive = 0;
        recovered
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}
