use super::{ComponentState, Orchestrator};
use crate::error::CameraError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl Orchestrator {
    /// Stop every task and release the frame sources.
    ///
    /// Loops stop first so an in-flight commit can finish; capture tasks close
    /// their sources last. Returns exit code 1 if any component failed.
    pub async fn shutdown(&mut self) -> crate::error::Result<i32> {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();

        let limit = Duration::from_secs(self.config.system.shutdown_timeout_secs.max(1));

        if let Some(handle) = self.frame_task.take() {
            if let Some(stats) = self.stop_task("frame_loop", handle, limit).await {
                if let Some(reason) = &stats.fatal {
                    error!("Frame loop ended with error: {}", reason);
                    self.set_component_state("frame_loop", ComponentState::Failed)
                        .await;
                }
                self.frame_stats = Some(stats);
            }
        }

        if let Some(handle) = self.gesture_task.take() {
            if let Some(stats) = self.stop_task("gesture_loop", handle, limit).await {
                if stats.fatal.is_some() {
                    self.set_component_state("gesture_loop", ComponentState::Failed)
                        .await;
                }
                self.gesture_stats = Some(stats);
            }
        }

        if let Some(handle) = self.retention_task.take() {
            self.stop_task("retention", handle, limit).await;
        }

        for (name, handle) in std::mem::take(&mut self.capture_tasks) {
            match self.stop_task(&name, handle, limit).await {
                Some(Ok(frames)) => info!("{} forwarded {} frames", name, frames),
                Some(Err(CameraError::Exhausted)) => info!("{} finished its input", name),
                Some(Err(e)) => {
                    error!("{} failed: {}", name, e);
                    self.set_component_state(&name, ComponentState::Failed)
                        .await;
                }
                None => {}
            }
        }

        let exit_code = if self.any_component_failed().await { 1 } else { 0 };
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Wait for a task to end within `limit`. A task that does not end in time is
    /// aborted and the component marked failed.
    async fn stop_task<T>(
        &self,
        component: &str,
        mut handle: JoinHandle<T>,
        limit: Duration,
    ) -> Option<T> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(limit, &mut handle).await {
            Ok(Ok(value)) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Some(value)
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component task failed: {}", component, e);
                None
            }
            Err(_) => {
                handle.abort();
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                warn!("{} component stop timeout after {:?}", component, limit);
                None
            }
        }
    }
}
