use std::fmt;

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    /// A component could not continue (lost frame source, lost detector) or ran out of input
    ComponentFinished,
    UserRequest,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::ComponentFinished => write!(f, "component finished"),
            ShutdownReason::UserRequest => write!(f, "user request"),
        }
    }
}

/// Counters reported by the frame loop when it ends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameLoopStats {
    pub frames_seen: u64,
    pub frames_skipped: u64,
    pub frames_analyzed: u64,
    pub gaps: u64,
    /// Detector calls that ran out of time; each also counts as a gap
    pub detector_timeouts: u64,
    pub events_recorded: u64,
    pub events_suppressed: u64,
    pub commit_failures: u64,
    /// Set when the loop gave up because the detector was lost
    pub fatal: Option<String>,
}

/// Counters reported by the gesture loop when it ends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureLoopStats {
    pub frames_classified: u64,
    pub transitions: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub fatal: Option<String>,
}
