//! Attaches classifiers and pass-through loggers to node output.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    LineClassifier, ListenerId, OutputStream, StartupSignal, StreamName, WatcherRegistry,
    WatcherRole,
};
use crate::logging::{LoggerSlot, NodeLogger};

type Chunks = broadcast::Receiver<String>;

/// Receivers passed from startup listeners to the streaming-mode tails.
type Handoff = Arc<Mutex<HashMap<StreamName, oneshot::Sender<Chunks>>>>;

fn hand_over(handoff: &Handoff, name: StreamName, rx: Chunks) {
    let slot = handoff
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&name);
    if let Some(slot) = slot {
        let _ = slot.send(rx);
    }
}

/// Where a steady-state tail reads from.
enum TailSource {
    Fresh(Chunks),
    /// The startup listener's receiver, including chunks it had not read yet.
    Inherited(oneshot::Receiver<Chunks>, OutputStream),
}

/// Owns the listeners attached to the node's output streams.
#[derive(Debug, Clone)]
pub struct LogWatcher {
    registry: Arc<Mutex<WatcherRegistry>>,
    handoff: Handoff,
    logger: LoggerSlot,
    startup_timeout: Duration,
}

impl LogWatcher {
    #[must_use]
    pub fn new(logger: LoggerSlot, startup_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(WatcherRegistry::new())),
            handoff: Arc::default(),
            logger,
            startup_timeout,
        }
    }

    fn registry(&self) -> MutexGuard<'_, WatcherRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handoff(&self) -> MutexGuard<'_, HashMap<StreamName, oneshot::Sender<Chunks>>> {
        self.handoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the startup filter on `stream`, replacing any previous one.
    ///
    /// Every chunk is forwarded to the logger. Classified signals go to
    /// `on_signal`. The startup timer starts now; it is disarmed by the first
    /// ready or fatal line. On expiry the filter detaches itself and reports
    /// [`StartupSignal::TimedOut`].
    pub fn attach_startup_filter<F>(&self, stream: &OutputStream, mut on_signal: F)
    where
        F: FnMut(StartupSignal) + Send + 'static,
    {
        let mut rx = stream.subscribe();
        let name = stream.name();
        let (id, cancel) = self
            .registry()
            .install(WatcherRole::StartupFilter, vec![name]);
        let registry = Arc::clone(&self.registry);
        let handoff = Arc::clone(&self.handoff);
        let logger = self.logger.clone();
        let timeout = self.startup_timeout;

        tokio::spawn(async move {
            let mut classifier = LineClassifier::new();
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        hand_over(&handoff, name, rx);
                        break;
                    }

                    () = &mut deadline, if !classifier.is_settled() => {
                        registry
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .detach_if(WatcherRole::StartupFilter, id);
                        tracing::warn!(?timeout, "Node did not report readiness in time");
                        on_signal(StartupSignal::TimedOut(timeout));
                        break;
                    }

                    chunk = rx.recv() => match chunk {
                        Ok(chunk) => {
                            for signal in classifier.inspect(&chunk) {
                                on_signal(signal);
                            }
                            logger.info(&chunk);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Startup filter lagged behind node output");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// Forward `stream` to the logger while the startup filter is attached.
    ///
    /// The tail shares the startup filter's lifetime; streaming mode picks up
    /// its receiver so no chunk is lost at the switch. Returns `false` when no
    /// startup filter is attached.
    pub fn tail_during_startup(&self, stream: &OutputStream) -> bool {
        let rx = stream.subscribe();
        let joined = self.registry().join(WatcherRole::StartupFilter, stream.name());
        match joined {
            Some((id, cancel)) => {
                self.spawn_tail(TailSource::Fresh(rx), stream.name(), id, cancel);
                true
            }
            None => false,
        }
    }

    /// Replace the startup filter with pass-through logging on both streams.
    ///
    /// Chunks the startup listeners had not consumed yet are logged by the
    /// new tails. Returns `false` without changes if streaming mode is
    /// already active.
    pub fn switch_to_streaming_mode(&self, stdout: &OutputStream, stderr: &OutputStream) -> bool {
        let (id, cancel, mut inherited) = {
            let mut registry = self.registry();
            if registry.is_active(WatcherRole::SteadyStateFilter) {
                return false;
            }
            let mut inherited = HashMap::new();
            {
                let mut handoff = self.handoff();
                for name in registry.streams(WatcherRole::StartupFilter) {
                    let (tx, rx) = oneshot::channel();
                    handoff.insert(name, tx);
                    inherited.insert(name, rx);
                }
            }
            registry.detach(WatcherRole::StartupFilter);
            let (id, cancel) = registry.install(
                WatcherRole::SteadyStateFilter,
                vec![stdout.name(), stderr.name()],
            );
            (id, cancel, inherited)
        };

        for stream in [stdout, stderr] {
            let source = match inherited.remove(&stream.name()) {
                Some(slot) => TailSource::Inherited(slot, stream.clone()),
                None => TailSource::Fresh(stream.subscribe()),
            };
            self.spawn_tail(source, stream.name(), id, cancel.clone());
        }
        true
    }

    fn spawn_tail(
        &self,
        source: TailSource,
        name: StreamName,
        id: ListenerId,
        cancel: CancellationToken,
    ) {
        let logger = self.logger.clone();
        let handoff = Arc::clone(&self.handoff);

        tokio::spawn(async move {
            let mut rx = match source {
                TailSource::Fresh(rx) => rx,
                TailSource::Inherited(slot, stream) => tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    inherited = slot => inherited.unwrap_or_else(|_| stream.subscribe()),
                },
            };

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        hand_over(&handoff, name, rx);
                        break;
                    }

                    chunk = rx.recv() => match chunk {
                        Ok(chunk) => logger.info(&chunk),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(stream = %name, skipped, "Log tail lagged behind node output");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::trace!(stream = %name, id, "Log tail finished");
        });
    }

    /// Remove every listener. Safe when nothing is attached.
    pub fn detach_all(&self) {
        let mut registry = self.registry();
        self.handoff().clear();
        registry.detach_all();
    }

    #[must_use]
    pub fn is_active(&self, role: WatcherRole) -> bool {
        self.registry().is_active(role)
    }

    /// No listener of any role is attached.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.registry().is_empty()
    }
}
