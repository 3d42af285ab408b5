//! IPC connection lifecycle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::CompatibilityCheck;
use crate::api::{ControlApi, ControlApiError};
use crate::event::{EventBus, NodeEvent, StatusHandle};
use crate::logging::{LoggerSlot, NodeLogger};

/// Connection state of the control API transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Failed,
}

/// Everything a connection attempt needs, detached from the monitor.
#[derive(Clone)]
struct Link {
    api: Arc<dyn ControlApi>,
    check: CompatibilityCheck,
    events: EventBus,
    status: StatusHandle,
    logger: LoggerSlot,
    state: Arc<Mutex<TransportState>>,
}

impl Link {
    fn set_state(&self, next: TransportState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*state, to = ?next, "Transport state transition");
        *state = next;
    }

    async fn run(self, endpoint: PathBuf, cancel: CancellationToken) {
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = self.api.connect(&endpoint) => result,
        };
        if let Err(e) = connected {
            self.fail(&e).await;
            return;
        }

        self.logger.info("connection to ipc established");
        self.set_state(TransportState::Connected);
        self.events.publish(NodeEvent::IpcConnected);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = self.check.run(self.api.as_ref(), &self.events, &self.logger) => result,
        };
        match outcome {
            Ok(true) if !cancel.is_cancelled() => {
                self.status.set_api(true);
            }
            Ok(_) => {}
            Err(e) if e.is_transport() => {
                self.fail(&e).await;
                return;
            }
            Err(e) => self
                .logger
                .error(&format!("compatibility check failed: {e}")),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = self.api.closed() => {
                let lost = std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "node closed the IPC connection",
                );
                self.fail(&ControlApiError::Transport(lost)).await;
            }
        }
    }

    async fn fail(&self, error: &ControlApiError) {
        self.api.reset().await;
        self.logger.error(&error.to_string());
        self.status.set_api(false);
        self.set_state(TransportState::Failed);
        self.events.publish(NodeEvent::IpcDisconnected);
    }
}

/// Owns the control API connection.
///
/// Reconnection is driven by the caller; a failed connection stays failed
/// until [`TransportMonitor::connect`] is called again.
pub struct TransportMonitor {
    link: Link,
    attempt: Mutex<Option<CancellationToken>>,
    endpoint: Mutex<Option<PathBuf>>,
}

impl TransportMonitor {
    #[must_use]
    pub fn new(
        api: Arc<dyn ControlApi>,
        check: CompatibilityCheck,
        events: EventBus,
        status: StatusHandle,
        logger: LoggerSlot,
    ) -> Self {
        Self {
            link: Link {
                api,
                check,
                events,
                status,
                logger,
                state: Arc::new(Mutex::new(TransportState::Closed)),
            },
            attempt: Mutex::new(None),
            endpoint: Mutex::new(None),
        }
    }

    fn attempt(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the transport to `endpoint` in the background.
    ///
    /// On success `IPC_CONNECTED` is published and the compatibility check
    /// runs; a passing check raises `api`. The connection is then watched
    /// until it is lost. On a transport error or a lost connection the
    /// client is reset, `api` is lowered and `IPC_DISCONNECTED` is
    /// published. A previous attempt still in flight is abandoned.
    pub fn connect(&self, endpoint: PathBuf) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.attempt().replace(cancel.clone()) {
            previous.cancel();
        }
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = Some(endpoint.clone());

        tracing::info!(endpoint = %endpoint.display(), "Connecting to node IPC");
        self.link.set_state(TransportState::Connecting);
        tokio::spawn(self.link.clone().run(endpoint, cancel));
    }

    /// Abandon any attempt, reset the client and close the transport.
    pub async fn disconnect(&self) {
        if let Some(attempt) = self.attempt().take() {
            attempt.cancel();
        }
        self.link.api.reset().await;
        self.link.status.set_api(false);
        self.link.set_state(TransportState::Closed);
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.link.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Endpoint of the most recent `connect`.
    #[must_use]
    pub fn endpoint(&self) -> Option<PathBuf> {
        self.endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The control API client shared with the connection.
    #[must_use]
    pub fn api(&self) -> &Arc<dyn ControlApi> {
        &self.link.api
    }

    /// Whether `endpoint` is the one last connected to.
    #[must_use]
    pub fn targets(&self, endpoint: &Path) -> bool {
        self.endpoint().as_deref() == Some(endpoint)
    }
}

impl std::fmt::Debug for TransportMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportMonitor")
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}
