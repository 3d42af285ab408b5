//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use node_supervisor::api::{ControlApi, ControlApiError};
use node_supervisor::event::{EventStream, NodeEvent};
use node_supervisor::provision::{BinaryProvisioner, ProvisionError};
use tokio_util::sync::CancellationToken;

/// How long tests wait for an expected event.
pub const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Provisioner that hands out a fixed path, or fails.
pub struct FakeProvisioner {
    pub binary: Option<PathBuf>,
    pub delay: Duration,
    pub version: String,
    pub calls: Arc<AtomicUsize>,
}

impl FakeProvisioner {
    pub fn found(binary: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            binary: Some(binary.into()),
            delay: Duration::ZERO,
            version: "v1.4.9".to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn missing() -> Arc<Self> {
        Arc::new(Self {
            binary: None,
            delay: Duration::ZERO,
            version: "v1.4.9".to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn slow_missing(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            binary: None,
            delay,
            version: "v1.4.9".to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl BinaryProvisioner for FakeProvisioner {
    async fn ensure(&self) -> Result<PathBuf, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.binary
            .clone()
            .ok_or_else(|| ProvisionError::NotFound(PathBuf::from("/nowhere/geth")))
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn with_target(&self, dir: PathBuf) -> Arc<dyn BinaryProvisioner> {
        Arc::new(Self {
            binary: self.binary.as_ref().map(|_| dir.join("geth")),
            delay: self.delay,
            version: self.version.clone(),
            calls: Arc::clone(&self.calls),
        })
    }
}

/// Control API answering from fixed values.
pub struct FakeApi {
    pub build_version: String,
    pub network: String,
    pub refuse: bool,
    pub datadir: PathBuf,
    pub connects: AtomicUsize,
    pub resets: AtomicUsize,
    pub reset_delay: Duration,
    link: Mutex<Option<CancellationToken>>,
}

impl FakeApi {
    pub fn new(build_version: &str, network: &str) -> Self {
        Self {
            build_version: build_version.to_string(),
            network: network.to_string(),
            refuse: false,
            datadir: PathBuf::from("/home/n/.ethereum"),
            connects: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            reset_delay: Duration::ZERO,
            link: Mutex::new(None),
        }
    }

    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::new("Geth/v1.4.9-stable/linux/go1.6.2", "1"))
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::new("", "")
        })
    }

    /// Healthy node whose `reset` takes `delay`.
    pub fn slow_reset(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reset_delay: delay,
            ..Self::new("Geth/v1.4.9-stable/linux/go1.6.2", "1")
        })
    }

    /// Simulate the node closing its end of the connection.
    pub fn drop_connection(&self) {
        if let Some(link) = self.link.lock().unwrap().take() {
            link.cancel();
        }
    }
}

#[async_trait]
impl ControlApi for FakeApi {
    async fn connect(&self, _endpoint: &Path) -> Result<(), ControlApiError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(ControlApiError::Transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let link = CancellationToken::new();
        if let Some(previous) = self.link.lock().unwrap().replace(link) {
            previous.cancel();
        }
        Ok(())
    }

    async fn node_version(&self) -> Result<String, ControlApiError> {
        Ok(self.build_version.clone())
    }

    async fn network_id(&self) -> Result<String, ControlApiError> {
        Ok(self.network.clone())
    }

    async fn data_dir(&self) -> Result<PathBuf, ControlApiError> {
        Ok(self.datadir.clone())
    }

    async fn closed(&self) {
        let link = self.link.lock().unwrap().clone();
        if let Some(link) = link {
            link.cancelled().await;
        }
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
        tokio::time::sleep(self.reset_delay).await;
    }
}

/// Receive events until one matches `done`, returning everything seen.
pub async fn collect_until(
    events: &mut EventStream,
    done: impl Fn(&NodeEvent) -> bool,
) -> Vec<NodeEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(EVENT_WAIT, async {
        while let Some(event) = events.recv().await {
            let finished = done(&event);
            seen.push(event);
            if finished {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for event, saw {seen:?}");
    seen
}

/// Write an executable shell script standing in for the node binary.
#[cfg(unix)]
pub fn fake_node(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("geth");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Node that reports readiness on stderr and then idles.
pub const READY_NODE: &str = "echo 'INFO [01-01] IPC endpoint opened: geth.ipc' >&2\nexec sleep 30";
