// Process liveness signal
// Consumed by the health gate, the health route and the shutdown future

use std::sync::Arc;
use tokio::sync::watch;

/// Process-wide health status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// A fatal condition was detected; the process must drain and exit
    Failed { reason: String },
}

/// Shared handle to the process health status
///
/// Cloning is cheap; every clone observes the same status. Once `Failed`,
/// the status never returns to `Healthy`.
#[derive(Clone)]
pub struct HealthState {
    tx: Arc<watch::Sender<Health>>,
}

impl HealthState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Health::Healthy);
        Self { tx: Arc::new(tx) }
    }

    /// Current status snapshot
    pub fn current(&self) -> Health {
        self.tx.borrow().clone()
    }

    pub fn is_healthy(&self) -> bool {
        matches!(*self.tx.borrow(), Health::Healthy)
    }

    /// Mark the process as failed. The first reason wins.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let changed = self.tx.send_if_modified(|health| match health {
            Health::Healthy => {
                *health = Health::Failed {
                    reason: reason.clone(),
                };
                true
            }
            Health::Failed { .. } => false,
        });

        if changed {
            tracing::error!(reason = %reason, "Proxy marked as failed, refusing new requests");
        }
    }

    /// Resolve once the process has been marked as failed
    pub async fn failed(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Health::Failed { reason } = &*rx.borrow_and_update() {
                return reason.clone();
            }
            // The sender lives in `self`, so `changed` cannot observe a closed channel here
            if rx.changed().await.is_err() {
                return "health channel closed".to_string();
            }
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
