use tokio::sync::watch;
use tracing::{debug, info};

/// Graceful shutdown coordinator for the orchestration core.
///
/// Every background task (the four event consumers and the workflow worker)
/// holds a [`ShutdownSignal`] and checks it at its own checkpoints: between
/// dequeues, between steps and between attempts. Nothing is aborted mid-call.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self { sender }
    }

    /// Hand out a signal for a task to observe
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !*self.sender.borrow() {
            info!("Initiating cooperative shutdown of orchestration tasks");
        }
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Cloneable view of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires, for components used without a coordinator
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_shutdown(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };
        if *receiver.borrow() {
            return;
        }
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
        // Coordinator dropped without signalling; treat as shutdown
        debug!("Shutdown coordinator dropped, releasing waiters");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_fires_after_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        assert!(!signal.is_shutdown());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.is_shutdown()
        });

        coordinator.shutdown();
        let observed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .expect("waiter should not panic");
        assert!(observed);
        assert!(coordinator.is_shutdown());
    }

    #[tokio::test]
    async fn test_signal_taken_after_shutdown_is_already_cancelled() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();
        coordinator.shutdown();

        let mut late = coordinator.signal();
        assert!(late.is_shutdown());
        late.cancelled().await;
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let mut signal = ShutdownSignal::never();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
