//! Node supervisor.
//!
//! Ties together option merging, binary provisioning, the node process, its
//! log watchers and the control API transport, and publishes the outcome as
//! [`NodeEvent`]s plus a `{process, api}` [`ServiceStatus`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::{
    ChildHandle, ExitReport, NodeCommand, NodePipes, StopSignal, SupervisorState,
    SupervisorStateMachine, SupervisorStats,
};
use crate::api::{ControlApi, ControlApiError, IpcControlClient};
use crate::config::NodeConfig;
use crate::event::{
    Component, EventBus, EventStream, NodeEvent, ServiceStatus, StatusHandle,
    DEFAULT_EVENT_CAPACITY,
};
use crate::logging::{LoggerSlot, NodeLogger, TracingLogger};
use crate::options::{DefaultPaths, OptionStore, OptionsError, SpawnOptions};
use crate::provision::{BinaryProvisioner, LocalBinary};
use crate::transport::{CompatibilityCheck, TransportMonitor, TransportState};
use crate::watcher::{LogWatcher, OutputStream, StartupSignal, StreamName, WatcherRole};

/// Message published when the node never reports readiness.
pub const STARTUP_TIMEOUT_MESSAGE: &str = "node connection timeout";

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// Default paths could not be derived for this host.
    #[error(transparent)]
    Options(#[from] OptionsError),
    /// A control API query failed.
    #[error("Control API error: {0}")]
    Api(#[from] ControlApiError),
    /// The process-wide supervisor was already installed.
    #[error("Supervisor already initialized")]
    AlreadyInitialized,
}

/// State shared with the background tasks of a session.
struct Shared {
    config: NodeConfig,
    events: EventBus,
    status: StatusHandle,
    machine: Mutex<SupervisorStateMachine>,
    logger: LoggerSlot,
    watcher: LogWatcher,
    transport: TransportMonitor,
    /// Bumped on every spawn; stale callbacks compare against it.
    generation: AtomicU64,
}

impl Shared {
    fn emit(&self, event: NodeEvent) {
        self.events.publish(event);
    }

    fn machine(&self) -> MutexGuard<'_, SupervisorStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: SupervisorState) {
        self.machine().transition(state);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn on_startup_signal(
        &self,
        generation: u64,
        signal: StartupSignal,
        stdout: &OutputStream,
        stderr: &OutputStream,
        endpoint: Option<&Path>,
    ) {
        if !self.is_current(generation) {
            tracing::debug!(?signal, "Dropping signal from a previous session");
            return;
        }

        match signal {
            StartupSignal::TimeNotSynced(message) => {
                self.emit(NodeEvent::TimeNotSynced { message });
            }
            StartupSignal::Fatal(message) => {
                self.emit(NodeEvent::Fatal { message });
            }
            StartupSignal::Ready => {
                self.status.set_process(true);
                self.transition(SupervisorState::Running);
                self.emit(NodeEvent::Started);
                self.watcher.switch_to_streaming_mode(stdout, stderr);
                match endpoint {
                    Some(endpoint) => self.transport.connect(endpoint.to_path_buf()),
                    None => self
                        .logger
                        .error("no IPC endpoint configured, control API unavailable"),
                }
            }
            StartupSignal::TimedOut(after) => {
                self.transition(SupervisorState::Failed);
                self.logger
                    .error(&format!("{STARTUP_TIMEOUT_MESSAGE} after {after:?}"));
                self.emit(NodeEvent::Error {
                    message: STARTUP_TIMEOUT_MESSAGE.to_string(),
                });
            }
        }
    }

    async fn on_exit(&self, generation: u64, report: &ExitReport, stop_requested: bool) {
        match report {
            ExitReport::Code(code) if *code != 0 => {
                let message = format!("node: {report}");
                self.logger.error(&message);
                self.emit(NodeEvent::Error { message });
            }
            ExitReport::Code(_) | ExitReport::Signal(_) => {
                self.logger.info(&format!("node: {report}"));
            }
            ExitReport::WaitFailed(reason) => {
                self.logger.error(&format!("node:spawn:error: {reason}"));
                self.status.set_process(false);
                self.emit(NodeEvent::Failed {
                    component: Component::NodeProcess,
                });
                self.transition(SupervisorState::Failed);
                return;
            }
        }
        self.status.set_process(false);

        if stop_requested || !self.is_current(generation) {
            return;
        }

        self.watcher.detach_all();
        let open = matches!(
            self.transport.state(),
            TransportState::Connecting | TransportState::Connected
        );
        self.transport.disconnect().await;
        if open {
            self.emit(NodeEvent::IpcDisconnected);
        }
        self.transition(SupervisorState::Stopped);
        self.emit(NodeEvent::Stopped);
    }
}

/// Mutable per-supervisor session data.
struct Session {
    options: OptionStore,
    provisioner: Arc<dyn BinaryProvisioner>,
    child: Option<ChildHandle>,
    stop_requested: Arc<AtomicBool>,
    attached: bool,
}

impl Session {
    fn apply_bin_dir(&mut self, dir: Option<PathBuf>) {
        if let Some(dir) = dir {
            self.provisioner = self.provisioner.with_target(dir);
        }
    }

    fn child_running(&self) -> bool {
        self.child.as_ref().is_some_and(|child| !child.has_exited())
    }
}

/// Builder for [`NodeSupervisor`].
pub struct SupervisorBuilder {
    config: NodeConfig,
    provisioner: Option<Arc<dyn BinaryProvisioner>>,
    api: Option<Arc<dyn ControlApi>>,
    logger: Option<Arc<dyn NodeLogger>>,
    defaults: Option<DefaultPaths>,
    event_capacity: usize,
}

impl SupervisorBuilder {
    #[must_use]
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            provisioner: None,
            api: None,
            logger: None,
            defaults: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Use a custom binary provisioner instead of [`LocalBinary`].
    #[must_use]
    pub fn provisioner(mut self, provisioner: Arc<dyn BinaryProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Use a custom control API client instead of [`IpcControlClient`].
    #[must_use]
    pub fn control_api(mut self, api: Arc<dyn ControlApi>) -> Self {
        self.api = Some(api);
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn NodeLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Fix the default data directory and IPC path instead of detecting them.
    #[must_use]
    pub fn default_paths(mut self, defaults: DefaultPaths) -> Self {
        self.defaults = Some(defaults);
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn build(self) -> NodeSupervisor {
        let config = self.config;
        let provisioner = self.provisioner.unwrap_or_else(|| {
            let dir = config.bin_dir.clone().unwrap_or_else(LocalBinary::default_dir);
            Arc::new(
                LocalBinary::new(dir, config.required_version.clone())
                    .binary_name(config.binary_name.clone()),
            )
        });
        let api = self
            .api
            .unwrap_or_else(|| Arc::new(IpcControlClient::new()));
        let logger = LoggerSlot::new(self.logger.unwrap_or_else(|| Arc::new(TracingLogger)));
        let events = EventBus::new(self.event_capacity);
        let status = StatusHandle::new();

        let check = CompatibilityCheck::new(provisioner.version(), config.network_id.clone());
        let transport = TransportMonitor::new(
            api,
            check,
            events.clone(),
            status.clone(),
            logger.clone(),
        );
        let watcher = LogWatcher::new(logger.clone(), config.startup_timeout());

        let required = config.required_options();
        let options = match self.defaults {
            Some(defaults) => OptionStore::with_defaults(required, defaults),
            None => OptionStore::new(required),
        };

        NodeSupervisor {
            shared: Arc::new(Shared {
                config,
                events,
                status,
                machine: Mutex::new(SupervisorStateMachine::new()),
                logger,
                watcher,
                transport,
                generation: AtomicU64::new(0),
            }),
            session: tokio::sync::Mutex::new(Session {
                options,
                provisioner,
                child: None,
                stop_requested: Arc::new(AtomicBool::new(false)),
                attached: false,
            }),
        }
    }
}

/// Supervises one external node process.
///
/// Expected failures never surface as `Err` from [`start`](Self::start),
/// [`stop`](Self::stop) or [`restart`](Self::restart); they are published as
/// events. Use [`init`](super::init) and [`shared`](super::shared) to keep a
/// single process-wide instance.
pub struct NodeSupervisor {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Session>,
}

impl NodeSupervisor {
    /// Supervisor with the default provisioner, client and logger.
    #[must_use]
    pub fn new(config: NodeConfig) -> Self {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: NodeConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    /// Launch the node.
    ///
    /// `STARTING` is always published first. Returns `Ok(true)` when a
    /// process was spawned. Provisioning and spawn failures are published as
    /// events and yield `Ok(false)`, as does a call while attached to an
    /// external node or while another start, a run or a stop is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Options`] when default paths cannot be
    /// derived on this host.
    pub async fn start(&self, options: Option<SpawnOptions>) -> Result<bool, SupervisorError> {
        self.shared.emit(NodeEvent::Starting);
        {
            let session = self.session.lock().await;
            let state = self.shared.machine().state();
            if session.child_running() || !state.can_start() {
                tracing::warn!(?state, "Node already running, ignoring start");
                return Ok(false);
            }
            self.shared.transition(SupervisorState::Starting);
        }

        let provisioner = {
            let mut session = self.session.lock().await;
            let merged = match session.options.set(options) {
                Ok(merged) => merged,
                Err(e) => {
                    self.shared.transition(SupervisorState::Failed);
                    return Err(e.into());
                }
            };
            session.apply_bin_dir(merged.bin_dir);
            Arc::clone(&session.provisioner)
        };

        let Some(binary) = self.resolve_binary(provisioner.as_ref()).await else {
            self.shared.status.set_process(false);
            self.shared.emit(NodeEvent::Failed {
                component: Component::Binary,
            });
            self.shared.transition(SupervisorState::Failed);
            return Ok(false);
        };

        let mut session = self.session.lock().await;
        if session.attached {
            tracing::info!("Attached to an external node, not spawning");
            self.shared.transition(SupervisorState::Idle);
            return Ok(false);
        }

        let command = NodeCommand::new(binary, session.options.to_argv());
        let (child, pipes) = match ChildHandle::spawn(&command, self.shared.config.stop_grace()) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.shared
                    .logger
                    .error(&format!("node:spawn:error: {e}"));
                self.shared.status.set_process(false);
                self.shared.emit(NodeEvent::Failed {
                    component: Component::NodeProcess,
                });
                self.shared.transition(SupervisorState::Failed);
                return Ok(false);
            }
        };

        let stop_requested = Arc::new(AtomicBool::new(false));
        self.attach_session(
            child.exit_watch(),
            pipes,
            session.options.ipc_path(),
            Arc::clone(&stop_requested),
        );
        session.child = Some(child);
        session.stop_requested = stop_requested;
        Ok(true)
    }

    /// Resolve the binary, announcing slow resolution.
    async fn resolve_binary(&self, provisioner: &dyn BinaryProvisioner) -> Option<PathBuf> {
        let ensure = provisioner.ensure();
        tokio::pin!(ensure);

        let result = match tokio::time::timeout(self.shared.config.binary_notice(), &mut ensure).await
        {
            Ok(result) => result,
            Err(_) => {
                self.shared.emit(NodeEvent::DownloadingBinary);
                ensure.await
            }
        };

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                let error = e.to_string();
                self.shared.logger.error(&error);
                self.shared.emit(NodeEvent::BinaryCorrupted { error });
                None
            }
        }
    }

    /// Wire exit handling and log watching for a freshly spawned node.
    fn attach_session(
        &self,
        exit: watch::Receiver<Option<ExitReport>>,
        pipes: NodePipes,
        endpoint: Option<PathBuf>,
        stop_requested: Arc<AtomicBool>,
    ) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.status.set_process(false);

        let stdout = OutputStream::new(StreamName::Stdout);
        let stderr = OutputStream::new(StreamName::Stderr);

        let on_signal = {
            let shared = Arc::clone(&self.shared);
            let (stdout, stderr) = (stdout.clone(), stderr.clone());
            move |signal| {
                shared.on_startup_signal(generation, signal, &stdout, &stderr, endpoint.as_deref());
            }
        };
        self.shared.watcher.attach_startup_filter(&stderr, on_signal);
        self.shared.watcher.tail_during_startup(&stdout);
        stdout.pipe_from(pipes.stdout);
        stderr.pipe_from(pipes.stderr);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut exit = exit;
            let report = match exit.wait_for(Option::is_some).await {
                Ok(report) => report.clone(),
                Err(_) => None,
            };
            if let Some(report) = report {
                shared
                    .on_exit(generation, &report, stop_requested.load(Ordering::SeqCst))
                    .await;
            }
        });
    }

    /// Stop the node.
    ///
    /// Listeners and the control API client are released before the signal
    /// is sent, so output from the dying process cannot reach a later
    /// session. Publishes `STOPPED` once the exit is observed, or right away
    /// when no process was running. Also ends an attachment made with
    /// [`connect_to_local`](Self::connect_to_local).
    pub async fn stop(&self, signal: Option<StopSignal>) {
        self.shared.emit(NodeEvent::Stopping);
        self.shared.transition(SupervisorState::Stopping);

        let mut session = self.session.lock().await;
        session.stop_requested.store(true, Ordering::SeqCst);
        self.flush_listeners().await;

        if let Some(mut child) = session.child.take() {
            let signal = signal.unwrap_or_default();
            tracing::info!(pid = child.id(), ?signal, "Stopping node process");
            if let Some(report) = child.terminate(signal).await {
                tracing::info!(%report, "Node process stopped");
            }
        }

        session.attached = false;
        self.shared.status.set_attached(false);
        self.shared.status.set_process(false);
        self.shared.transition(SupervisorState::Stopped);
        self.shared.emit(NodeEvent::Stopped);
    }

    async fn flush_listeners(&self) {
        self.shared.transport.disconnect().await;
        self.shared.watcher.detach_all();
    }

    /// Stop, wait, then start again with the previously merged options.
    ///
    /// `wait` defaults to the configured restart delay.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn restart(&self, wait: Option<Duration>) -> Result<bool, SupervisorError> {
        self.stop(None).await;
        tokio::time::sleep(wait.unwrap_or_else(|| self.shared.config.restart_delay())).await;
        self.start(None).await
    }

    /// Attach to a node someone else runs, via the local IPC endpoint.
    ///
    /// Uses the stored `ipcpath` option when set, the platform default
    /// otherwise. While attached, [`start`](Self::start) refuses to spawn.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Options`] when no default endpoint exists
    /// for this host.
    pub async fn connect_to_local(&self) -> Result<(), SupervisorError> {
        let mut session = self.session.lock().await;
        let endpoint = match session.options.ipc_path() {
            Some(endpoint) => endpoint,
            None => session.options.default_paths()?.ipc_path,
        };
        session.attached = true;
        self.shared.status.set_attached(true);
        self.shared.transport.connect(endpoint);
        Ok(())
    }

    /// Merge or replace the stored options without starting.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn set_options(
        &self,
        options: Option<SpawnOptions>,
    ) -> Result<SpawnOptions, SupervisorError> {
        let mut session = self.session.lock().await;
        let merged = session.options.set(options)?;
        session.apply_bin_dir(merged.bin_dir);
        Ok(merged.options)
    }

    /// Point the provisioner at another directory.
    pub async fn set_bin_dir(&self, dir: impl Into<PathBuf>) {
        self.session.lock().await.apply_bin_dir(Some(dir.into()));
    }

    pub fn set_logger(&self, logger: Arc<dyn NodeLogger>) {
        self.shared.logger.replace(logger);
    }

    /// `chaindata` directory inside the node's data directory.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Api`] when the control API is unreachable.
    pub async fn chain_folder(&self) -> Result<PathBuf, SupervisorError> {
        let datadir = self.shared.transport.api().data_dir().await?;
        Ok(datadir.join("chaindata"))
    }

    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.shared.status.get()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ServiceStatus> {
        self.shared.status.watch()
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shared.machine().state()
    }

    #[must_use]
    pub fn stats(&self) -> SupervisorStats {
        self.shared.machine().stats()
    }

    #[must_use]
    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.state()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.status.is_attached()
    }

    /// Whether a listener for `role` is attached to the node's output.
    #[must_use]
    pub fn watcher_active(&self, role: WatcherRole) -> bool {
        self.shared.watcher.is_active(role)
    }

    /// No log listener of any role is attached.
    #[must_use]
    pub fn watchers_idle(&self) -> bool {
        self.shared.watcher.is_idle()
    }

    /// Options currently stored for the next launch.
    pub async fn options(&self) -> SpawnOptions {
        self.session.lock().await.options.current().clone()
    }

    /// PID of the running node, if any.
    pub async fn pid(&self) -> Option<u32> {
        let session = self.session.lock().await;
        session
            .child
            .as_ref()
            .filter(|child| !child.has_exited())
            .and_then(ChildHandle::id)
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for NodeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSupervisor")
            .field("state", &self.state())
            .field("status", &self.status())
            .field("transport", &self.shared.transport)
            .finish_non_exhaustive()
    }
}
