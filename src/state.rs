//! Monitoring and cooldown state shared by the frame loop, gesture loop and query path.
//!
//! Every field lives behind one `parking_lot::Mutex`. Critical sections only read
//! or assign plain values; no frame reads, adapter calls or file writes happen
//! while the lock is held.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Whether the detection pipeline is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringState {
    Active,
    Stopped,
}

impl fmt::Display for MonitoringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoringState::Active => write!(f, "active"),
            MonitoringState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Minimum spacing between committed events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CooldownWindow {
    pub last_event: Option<SystemTime>,
    pub duration: Duration,
}

impl CooldownWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            last_event: None,
            duration,
        }
    }

    /// Time left before `at` may be committed. A clock that moved backwards
    /// relative to the last event counts as "not elapsed".
    pub fn remaining_at(&self, at: SystemTime) -> Duration {
        match self.last_event {
            None => Duration::ZERO,
            Some(last) => match at.duration_since(last) {
                Ok(elapsed) => self.duration.saturating_sub(elapsed),
                Err(_) => self.duration,
            },
        }
    }

    pub fn has_elapsed_at(&self, at: SystemTime) -> bool {
        self.remaining_at(at).is_zero()
    }
}

/// Consistent copy of the shared state, taken in one critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub monitoring: MonitoringState,
    pub cooldown: CooldownWindow,
    pub commit_in_flight: bool,
}

#[derive(Debug)]
struct Inner {
    monitoring: MonitoringState,
    cooldown: CooldownWindow,
    pending_commit: Option<SystemTime>,
}

/// Why a commit reservation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveDenied {
    /// The cooldown window has not elapsed for the requested timestamp
    CoolingDown { remaining: Duration },
    /// Another commit holds the reservation
    InFlight,
}

#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new(initial: MonitoringState, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                monitoring: initial,
                cooldown: CooldownWindow::new(cooldown),
                pending_commit: None,
            }),
        }
    }

    pub fn monitoring(&self) -> MonitoringState {
        self.inner.lock().monitoring
    }

    pub fn cooldown(&self) -> CooldownWindow {
        self.inner.lock().cooldown
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock();
        StateSnapshot {
            monitoring: inner.monitoring,
            cooldown: inner.cooldown,
            commit_in_flight: inner.pending_commit.is_some(),
        }
    }

    /// Returns the previous state. Only the gesture controller writes monitoring.
    pub(crate) fn set_monitoring(&self, state: MonitoringState) -> MonitoringState {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.monitoring, state)
    }

    /// Check the cooldown and claim the right to commit an event at `at`, as one step.
    ///
    /// While the returned permit is alive every other reservation is refused. The
    /// cooldown timestamp only moves when the permit is completed; dropping it
    /// releases the reservation and leaves the timestamp untouched.
    ///
    /// A reservation refused with [`ReserveDenied::InFlight`] is not queued. If the
    /// in-flight commit then fails, the refused confirmation is lost even when it lay
    /// outside the cooldown window; callers with more than one committer must retry it.
    pub fn try_reserve_commit(&self, at: SystemTime) -> Result<CommitPermit<'_>, ReserveDenied> {
        let mut inner = self.inner.lock();
        if inner.pending_commit.is_some() {
            return Err(ReserveDenied::InFlight);
        }
        let remaining = inner.cooldown.remaining_at(at);
        if !remaining.is_zero() {
            return Err(ReserveDenied::CoolingDown { remaining });
        }
        inner.pending_commit = Some(at);
        Ok(CommitPermit {
            state: self,
            at,
            completed: false,
        })
    }
}

/// Exclusive right to commit one event, obtained from [`SharedState::try_reserve_commit`]
#[must_use = "dropping a permit releases the reservation without recording anything"]
pub struct CommitPermit<'a> {
    state: &'a SharedState,
    at: SystemTime,
    completed: bool,
}

impl CommitPermit<'_> {
    pub fn timestamp(&self) -> SystemTime {
        self.at
    }

    /// Record the committed event's timestamp and release the reservation
    pub fn complete(mut self) {
        let mut inner = self.state.inner.lock();
        inner.cooldown.last_event = Some(self.at);
        inner.pending_commit = None;
        self.completed = true;
    }
}

impl Drop for CommitPermit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.state.inner.lock().pending_commit = None;
        }
    }
}

impl fmt::Debug for CommitPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitPermit")
            .field("at", &self.at)
            .field("completed", &self.completed)
            .finish()
    }
}
