use super::{Orchestrator, ShutdownReason};
use crate::error::{PhoneShamerError, Result};
use crate::events::PipelineEvent;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

impl Orchestrator {
    /// Run until a signal, a cancellation or a component failure, then shut down.
    /// Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        info!("phoneshamer is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| Self::missing("shutdown sender"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| Self::missing("shutdown receiver"))?;

        self.setup_signal_handlers(shutdown_sender);

        let reason = tokio::select! {
            received = shutdown_receiver => received.map_err(|_| {
                PhoneShamerError::system("Shutdown channel closed unexpectedly")
            })?,
            _ = self.cancellation_token.cancelled() => ShutdownReason::UserRequest,
            _ = self.fatal_token.cancelled() => ShutdownReason::ComponentFinished,
        };

        info!("Shutdown initiated: {}", reason);
        let _ = self.event_bus.publish(PipelineEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: reason.to_string(),
        });

        let exit_code = self.shutdown().await?;

        info!("phoneshamer shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
