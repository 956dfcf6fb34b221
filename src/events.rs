use crate::error::EventBusError;
use crate::state::MonitoringState;
use serde::Serialize;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events published by the pipeline components
#[derive(Debug, Clone, Serialize)]
pub enum PipelineEvent {
    /// A usage event was persisted
    UsageRecorded {
        event_id: Uuid,
        confirmed_at: SystemTime,
        screenshot: String,
    },
    /// A confirm decision was dropped because another commit owns the cooldown window
    UsageSuppressed {
        timestamp: SystemTime,
        remaining: Duration,
    },
    /// Screenshot or record write failed; nothing was persisted
    CommitFailed { timestamp: SystemTime, error: String },
    /// Gesture control switched monitoring on or off
    MonitoringChanged {
        state: MonitoringState,
        timestamp: SystemTime,
    },
    /// A frame source could not be recovered
    FrameSourceFailed {
        source: String,
        error: String,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl PipelineEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::UsageRecorded {
                event_id,
                screenshot,
                ..
            } => format!("Usage event {} recorded ({})", event_id, screenshot),
            PipelineEvent::UsageSuppressed { remaining, .. } => {
                format!("Usage event suppressed, cooldown {:?} left", remaining)
            }
            PipelineEvent::CommitFailed { error, .. } => format!("Commit failed: {}", error),
            PipelineEvent::MonitoringChanged { state, .. } => format!("Monitoring {}", state),
            PipelineEvent::FrameSourceFailed { source, error, .. } => {
                format!("Frame source {} failed: {}", source, error)
            }
            PipelineEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            PipelineEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::UsageRecorded { .. } => "usage_recorded",
            PipelineEvent::UsageSuppressed { .. } => "usage_suppressed",
            PipelineEvent::CommitFailed { .. } => "commit_failed",
            PipelineEvent::MonitoringChanged { .. } => "monitoring_changed",
            PipelineEvent::FrameSourceFailed { .. } => "frame_source_failed",
            PipelineEvent::SystemError { .. } => "system_error",
            PipelineEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Subscribe through a filter
    pub fn receiver(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers. Returns how many received it;
    /// publishing with nobody listening is not an error.
    pub fn publish(&self, event: PipelineEvent) -> Result<usize, EventBusError> {
        match &event {
            PipelineEvent::UsageRecorded { .. } | PipelineEvent::MonitoringChanged { .. } => {
                info!("{}", event.description());
            }
            PipelineEvent::CommitFailed { .. } | PipelineEvent::FrameSourceFailed { .. } => {
                warn!("{}", event.description());
            }
            PipelineEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            PipelineEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            PipelineEvent::UsageSuppressed { .. } => {
                debug!("{}", event.description());
            }
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    pub fn matches(&self, event: &PipelineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<PipelineEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter. Lagging skips ahead instead of failing.
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<PipelineEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
