//! `{process, api}` health view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Health of the supervised node.
///
/// `process` is true from the ready log line until exit or stop. `api` is
/// true from a passing compatibility check until a transport error or reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub process: bool,
    pub api: bool,
}

impl ServiceStatus {
    /// Both the process and its control API are up.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.process && self.api
    }
}

/// Shared, observable [`ServiceStatus`].
///
/// `api` may only be raised while `process` is true or while the supervisor
/// is attached to an instance it does not own.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<ServiceStatus>>,
    attached: Arc<AtomicBool>,
}

impl StatusHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ServiceStatus::default());
        Self {
            tx: Arc::new(tx),
            attached: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn get(&self) -> ServiceStatus {
        *self.tx.borrow()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ServiceStatus> {
        self.tx.subscribe()
    }

    pub fn set_process(&self, up: bool) {
        self.tx.send_if_modified(|status| {
            let changed = status.process != up;
            status.process = up;
            changed
        });
    }

    /// Update `api`. Returns `false` when raising it is not allowed.
    pub fn set_api(&self, up: bool) -> bool {
        let mut applied = true;
        let attached = self.is_attached();
        self.tx.send_if_modified(|status| {
            if up && !status.process && !attached {
                applied = false;
                return false;
            }
            let changed = status.api != up;
            status.api = up;
            changed
        });
        if !applied {
            tracing::warn!("Ignoring api=true while the node process is down");
        }
        applied
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}
