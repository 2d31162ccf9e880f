//! Pipeline controllers
//!
//! The two top-level drivers (question generation, conversation
//! completion) plus the machinery they share: the run-phase state
//! machine and the shutdown channel that turns an interrupt signal into
//! an orderly pause-with-flush.

pub mod batch;
pub mod completion;
pub mod generation;

use tokio::sync::watch;

/// Lifecycle of a controller run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    /// Interrupted externally; state and output were flushed.
    PausedOnSignal,
    Completed,
    Failed,
}

/// Fires the shutdown signal. Held by the binary's signal handler.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observes the shutdown signal inside the controllers.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Pends forever if the trigger
    /// was dropped without firing, which is exactly what a select! arm
    /// wants.
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_propagates() {
        let (trigger, mut shutdown) = shutdown_channel();
        assert!(!shutdown.is_requested());
        trigger.trigger();
        assert!(shutdown.is_requested());
        // Resolves immediately once fired
        shutdown.requested().await;
    }

    #[tokio::test]
    async fn test_unfired_shutdown_pends() {
        let (_trigger, mut shutdown) = shutdown_channel();
        let pending = shutdown.requested();
        tokio::select! {
            _ = pending => panic!("should not resolve"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
        }
    }
}
