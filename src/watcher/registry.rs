//! Bookkeeping of the active log listeners.

use tokio_util::sync::CancellationToken;

use super::StreamName;

/// The fixed set of listener roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherRole {
    /// Boot-time classifier on stderr, plus stdout pass-through.
    StartupFilter,
    /// Pass-through logger on stdout and stderr.
    SteadyStateFilter,
}

/// Identifies one installation of a listener.
pub type ListenerId = u64;

#[derive(Debug)]
struct ActiveListener {
    id: ListenerId,
    streams: Vec<StreamName>,
    cancel: CancellationToken,
}

/// At most one active listener per role.
///
/// Installing a role that is already active detaches the old listener first.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    startup: Option<ActiveListener>,
    steady: Option<ActiveListener>,
    next_id: ListenerId,
}

impl WatcherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, role: WatcherRole) -> &mut Option<ActiveListener> {
        match role {
            WatcherRole::StartupFilter => &mut self.startup,
            WatcherRole::SteadyStateFilter => &mut self.steady,
        }
    }

    /// Register a listener for `role` on `streams`.
    ///
    /// Returns its id and the token the listener task must stop on.
    pub fn install(
        &mut self,
        role: WatcherRole,
        streams: Vec<StreamName>,
    ) -> (ListenerId, CancellationToken) {
        self.detach(role);
        self.next_id += 1;
        let id = self.next_id;
        let cancel = CancellationToken::new();
        *self.slot(role) = Some(ActiveListener {
            id,
            streams,
            cancel: cancel.clone(),
        });
        tracing::debug!(?role, id, "Listener attached");
        (id, cancel)
    }

    /// Add `stream` to the active listener for `role`.
    ///
    /// Returns the listener's id and token, or `None` when `role` is idle.
    pub fn join(
        &mut self,
        role: WatcherRole,
        stream: StreamName,
    ) -> Option<(ListenerId, CancellationToken)> {
        let listener = self.slot(role).as_mut()?;
        if !listener.streams.contains(&stream) {
            listener.streams.push(stream);
        }
        Some((listener.id, listener.cancel.clone()))
    }

    /// Detach `role`. Returns whether a listener was active.
    pub fn detach(&mut self, role: WatcherRole) -> bool {
        match self.slot(role).take() {
            Some(listener) => {
                listener.cancel.cancel();
                tracing::debug!(?role, id = listener.id, streams = ?listener.streams, "Listener detached");
                true
            }
            None => false,
        }
    }

    /// Detach `role` only if `id` is still the active listener.
    pub fn detach_if(&mut self, role: WatcherRole, id: ListenerId) -> bool {
        if self.slot(role).as_ref().is_some_and(|l| l.id == id) {
            self.detach(role)
        } else {
            false
        }
    }

    pub fn detach_all(&mut self) {
        self.detach(WatcherRole::StartupFilter);
        self.detach(WatcherRole::SteadyStateFilter);
    }

    #[must_use]
    pub fn is_active(&self, role: WatcherRole) -> bool {
        match role {
            WatcherRole::StartupFilter => self.startup.is_some(),
            WatcherRole::SteadyStateFilter => self.steady.is_some(),
        }
    }

    /// Streams the listener for `role` is attached to.
    #[must_use]
    pub fn streams(&self, role: WatcherRole) -> Vec<StreamName> {
        let slot = match role {
            WatcherRole::StartupFilter => &self.startup,
            WatcherRole::SteadyStateFilter => &self.steady,
        };
        slot.as_ref().map(|l| l.streams.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.startup.is_none() && self.steady.is_none()
    }
}
