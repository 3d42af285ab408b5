//! Start, stop, restart and attach against fake nodes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use node_supervisor::config::NodeConfig;
use node_supervisor::event::{Component, NodeEvent, ServiceStatus};
use node_supervisor::logging::{LogLevel, MemoryLogger};
use node_supervisor::options::{DefaultPaths, Platform};
use node_supervisor::provision::BinaryProvisioner;
use node_supervisor::supervisor::{NodeSupervisor, SupervisorState};
use node_supervisor::transport::TransportState;
use node_supervisor::watcher::WatcherRole;

use crate::common::{collect_until, FakeApi, FakeProvisioner};

fn defaults(home: &Path) -> DefaultPaths {
    DefaultPaths::for_platform(Platform::Linux, home, Path::new(""))
}

fn supervisor(
    config: NodeConfig,
    provisioner: Arc<dyn BinaryProvisioner>,
    api: Arc<FakeApi>,
    home: &Path,
) -> (NodeSupervisor, Arc<MemoryLogger>) {
    let logger = Arc::new(MemoryLogger::new());
    let node = NodeSupervisor::builder(config)
        .provisioner(provisioner)
        .control_api(api)
        .logger(logger.clone())
        .default_paths(defaults(home))
        .build();
    (node, logger)
}

#[tokio::test]
async fn stop_without_process_emits_stopped() {
    let home = tempfile::tempdir().unwrap();
    let (node, _logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::missing(),
        FakeApi::healthy(),
        home.path(),
    );
    let mut events = node.subscribe();

    node.stop(None).await;

    assert_eq!(events.drain(), vec![NodeEvent::Stopping, NodeEvent::Stopped]);
    assert!(node.watchers_idle());
    assert_eq!(node.status(), ServiceStatus::default());
    assert_eq!(node.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn missing_binary_fails_without_spawning() {
    let home = tempfile::tempdir().unwrap();
    let (node, logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::missing(),
        FakeApi::healthy(),
        home.path(),
    );
    let mut events = node.subscribe();

    assert!(!node.start(None).await.unwrap());

    let seen = events.drain();
    assert_eq!(seen.first(), Some(&NodeEvent::Starting));
    assert!(matches!(seen[1], NodeEvent::BinaryCorrupted { .. }));
    assert_eq!(
        seen.last(),
        Some(&NodeEvent::Failed {
            component: Component::Binary
        })
    );
    assert!(!seen.contains(&NodeEvent::DownloadingBinary));
    assert_eq!(node.state(), SupervisorState::Failed);
    assert!(node.pid().await.is_none());
    assert!(!node.status().process);
    assert_eq!(logger.messages(LogLevel::Error).len(), 1);
}

#[tokio::test]
async fn slow_provisioning_announces_download() {
    let home = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        binary_notice_ms: 10,
        ..NodeConfig::default()
    };
    let (node, _logger) = supervisor(
        config,
        FakeProvisioner::slow_missing(Duration::from_millis(200)),
        FakeApi::healthy(),
        home.path(),
    );
    let mut events = node.subscribe();

    assert!(!node.start(None).await.unwrap());

    let names: Vec<_> = events.drain().iter().map(NodeEvent::name).collect();
    assert_eq!(
        names,
        vec!["STARTING", "DOWNLOADING_BINARY", "BINARY_CORRUPTED", "FAILED"]
    );
}

#[tokio::test]
async fn spawn_error_fails_node_process() {
    let home = tempfile::tempdir().unwrap();
    let (node, logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::found("/nonexistent/bin/geth"),
        FakeApi::healthy(),
        home.path(),
    );
    let mut events = node.subscribe();

    assert!(!node.start(None).await.unwrap());

    assert_eq!(
        events.drain(),
        vec![
            NodeEvent::Starting,
            NodeEvent::Failed {
                component: Component::NodeProcess
            }
        ]
    );
    assert!(logger
        .messages(LogLevel::Error)
        .iter()
        .any(|m| m.starts_with("node:spawn:error")));
    assert!(node.watchers_idle());
}

#[tokio::test]
async fn attach_connects_and_checks_compatibility() {
    let home = tempfile::tempdir().unwrap();
    let api = FakeApi::healthy();
    let (node, _logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::found("/nonexistent/bin/geth"),
        Arc::clone(&api),
        home.path(),
    );
    let mut events = node.subscribe();
    let mut status = node.watch_status();

    node.connect_to_local().await.unwrap();

    let seen = collect_until(&mut events, |e| *e == NodeEvent::EthNodeOk).await;
    assert_eq!(seen, vec![NodeEvent::IpcConnected, NodeEvent::EthNodeOk]);
    status.wait_for(|s| s.api).await.unwrap();
    assert!(!node.status().process);
    assert!(node.is_attached());
    assert_eq!(node.transport_state(), TransportState::Connected);

    // Attached mode never spawns.
    assert!(!node.start(None).await.unwrap());
    assert!(node.pid().await.is_none());

    node.stop(None).await;
    assert!(!node.is_attached());
    assert_eq!(node.status(), ServiceStatus::default());
    assert_eq!(node.transport_state(), TransportState::Closed);
}

#[tokio::test]
async fn attach_to_wrong_network_is_fatal() {
    let home = tempfile::tempdir().unwrap();
    let (node, logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::missing(),
        Arc::new(FakeApi::new("Geth/v1.4.9-stable", "3")),
        home.path(),
    );
    let mut events = node.subscribe();

    node.connect_to_local().await.unwrap();

    let seen = collect_until(&mut events, |e| matches!(e, NodeEvent::Fatal { .. })).await;
    assert_eq!(seen[0], NodeEvent::IpcConnected);
    assert!(!seen.contains(&NodeEvent::EthNodeOk));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!node.status().api);
    assert_eq!(logger.messages(LogLevel::Error).len(), 1);
}

#[tokio::test]
async fn attach_to_old_build_warns_but_connects() {
    let home = tempfile::tempdir().unwrap();
    let (node, _logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::missing(),
        Arc::new(FakeApi::new("Geth/v1.3.6-stable", "1")),
        home.path(),
    );
    let mut events = node.subscribe();
    let mut status = node.watch_status();

    node.connect_to_local().await.unwrap();

    let seen = collect_until(&mut events, |e| *e == NodeEvent::EthNodeOk).await;
    assert!(matches!(
        &seen[1],
        NodeEvent::Error { message } if message.contains("v1.4.9")
    ));
    status.wait_for(|s| s.api).await.unwrap();
}

#[tokio::test]
async fn refused_connection_reports_disconnect() {
    let home = tempfile::tempdir().unwrap();
    let api = FakeApi::refusing();
    let (node, _logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::missing(),
        Arc::clone(&api),
        home.path(),
    );
    let mut events = node.subscribe();

    node.connect_to_local().await.unwrap();

    let seen = collect_until(&mut events, |e| *e == NodeEvent::IpcDisconnected).await;
    assert_eq!(seen, vec![NodeEvent::IpcDisconnected]);
    assert_eq!(node.transport_state(), TransportState::Failed);
    assert!(!node.status().api);
    assert!(api.resets.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn chain_folder_is_under_node_datadir() {
    let home = tempfile::tempdir().unwrap();
    let (node, _logger) = supervisor(
        NodeConfig::default(),
        FakeProvisioner::missing(),
        FakeApi::healthy(),
        home.path(),
    );

    assert_eq!(
        node.chain_folder().await.unwrap(),
        Path::new("/home/n/.ethereum/chaindata")
    );
}

#[cfg(unix)]
mod process {
    use super::*;
    use crate::common::{fake_node, READY_NODE};
    use node_supervisor::options::SpawnOptions;
    use node_supervisor::supervisor::STARTUP_TIMEOUT_MESSAGE;

    fn short_timeout() -> NodeConfig {
        NodeConfig {
            startup_timeout_secs: 1,
            stop_grace_secs: 2,
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn ready_node_starts_and_connects() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(home.path(), READY_NODE);
        let (node, logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();
        let mut status = node.watch_status();

        assert!(node.start(None).await.unwrap());

        let seen = collect_until(&mut events, |e| *e == NodeEvent::EthNodeOk).await;
        assert_eq!(
            seen,
            vec![
                NodeEvent::Starting,
                NodeEvent::Started,
                NodeEvent::IpcConnected,
                NodeEvent::EthNodeOk
            ]
        );
        status.wait_for(ServiceStatus::is_operational).await.unwrap();
        assert_eq!(node.state(), SupervisorState::Running);
        assert!(node.pid().await.is_some());
        assert!(node.watcher_active(WatcherRole::SteadyStateFilter));
        assert!(!node.watcher_active(WatcherRole::StartupFilter));
        assert!(logger
            .messages(LogLevel::Info)
            .iter()
            .any(|m| m.contains("IPC endpoint opened")));

        // Past the startup window: the disarmed timer must stay silent.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(events.drain().is_empty());

        node.stop(None).await;
        assert_eq!(events.drain(), vec![NodeEvent::Stopping, NodeEvent::Stopped]);
        assert!(node.watchers_idle());
        assert_eq!(node.status(), ServiceStatus::default());
        assert!(node.pid().await.is_none());

        // The exit handler must not report a second stop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn fatal_line_suppresses_started() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(
            home.path(),
            "echo 'Fatal: datadir already used' >&2\necho 'IPC endpoint opened' >&2\nexec sleep 30",
        );
        let (node, _logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();

        assert!(node.start(None).await.unwrap());

        let seen = collect_until(&mut events, |e| matches!(e, NodeEvent::Fatal { .. })).await;
        assert!(!seen.contains(&NodeEvent::Started));
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let late = events.drain();
        assert!(!late.contains(&NodeEvent::Started), "late events: {late:?}");
        assert!(
            !late.iter().any(|e| matches!(e, NodeEvent::Error { .. })),
            "settled filter must not time out: {late:?}"
        );
        assert!(!node.status().process);

        node.stop(None).await;
    }

    #[tokio::test]
    async fn silent_node_times_out_but_keeps_running() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(home.path(), "exec sleep 30");
        let (node, logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();

        assert!(node.start(None).await.unwrap());

        let seen = collect_until(&mut events, |e| matches!(e, NodeEvent::Error { .. })).await;
        assert_eq!(
            seen.last(),
            Some(&NodeEvent::Error {
                message: STARTUP_TIMEOUT_MESSAGE.to_string()
            })
        );
        assert!(!node.watcher_active(WatcherRole::StartupFilter));
        assert!(node.pid().await.is_some());
        assert_eq!(node.state(), SupervisorState::Failed);
        assert_eq!(node.stats().failures, 1);
        assert!(logger
            .messages(LogLevel::Error)
            .iter()
            .any(|m| m.contains(STARTUP_TIMEOUT_MESSAGE)));

        node.stop(None).await;
        assert!(node.pid().await.is_none());
    }

    #[tokio::test]
    async fn unexpected_exit_reports_error_and_stopped() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(
            home.path(),
            "echo 'IPC endpoint opened' >&2\nsleep 1\nexit 3",
        );
        let (node, logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();

        assert!(node.start(None).await.unwrap());

        let seen = collect_until(&mut events, |e| *e == NodeEvent::Stopped).await;
        assert!(seen.contains(&NodeEvent::Started));
        assert!(seen.contains(&NodeEvent::Error {
            message: "node: exited with code: 3".to_string()
        }));
        assert!(seen.contains(&NodeEvent::IpcDisconnected));
        assert_eq!(node.status(), ServiceStatus::default());
        assert_eq!(node.state(), SupervisorState::Stopped);
        assert!(node.watchers_idle());
        assert!(logger
            .messages(LogLevel::Error)
            .contains(&"node: exited with code: 3".to_string()));
    }

    #[tokio::test]
    async fn second_start_while_running_is_ignored() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(home.path(), READY_NODE);
        let (node, _logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );

        assert!(node.start(None).await.unwrap());
        let mut events = node.subscribe();
        let pid = node.pid().await;
        assert!(!node.start(None).await.unwrap());
        assert_eq!(events.drain(), vec![NodeEvent::Starting]);
        assert_eq!(node.pid().await, pid);
        assert_eq!(node.stats().starts, 1);

        node.stop(None).await;
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_once() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(home.path(), READY_NODE);
        let provisioner = Arc::new(FakeProvisioner {
            binary: Some(binary),
            delay: Duration::from_millis(200),
            version: "v1.4.9".to_string(),
            calls: Arc::default(),
        });
        let (node, _logger) = supervisor(
            short_timeout(),
            provisioner,
            FakeApi::healthy(),
            home.path(),
        );

        let (first, second) = tokio::join!(node.start(None), node.start(None));
        let spawned = [first.unwrap(), second.unwrap()];
        assert_eq!(spawned.iter().filter(|s| **s).count(), 1);
        assert_eq!(node.stats().starts, 1);

        node.stop(None).await;
    }

    #[tokio::test]
    async fn self_inflicted_signal_is_not_an_error() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(
            home.path(),
            "echo 'IPC endpoint opened' >&2\nsleep 1\nkill -TERM $$",
        );
        let (node, logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();

        assert!(node.start(None).await.unwrap());

        let seen = collect_until(&mut events, |e| *e == NodeEvent::Stopped).await;
        assert!(seen.contains(&NodeEvent::Started));
        assert!(
            !seen.iter().any(|e| matches!(e, NodeEvent::Error { .. })),
            "signal exit reported as error: {seen:?}"
        );
        assert!(!node.status().process);
        assert_eq!(node.state(), SupervisorState::Stopped);
        assert!(logger
            .messages(LogLevel::Info)
            .contains(&"node: received signal: 15".to_string()));
        assert!(logger.messages(LogLevel::Error).is_empty());
    }

    #[tokio::test]
    async fn exit_during_stop_reports_stopped_once() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(
            home.path(),
            "echo 'IPC endpoint opened' >&2\nsleep 0.5\nexit 0",
        );
        let (node, _logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::slow_reset(Duration::from_millis(1500)),
            home.path(),
        );
        let mut events = node.subscribe();

        assert!(node.start(None).await.unwrap());
        collect_until(&mut events, |e| *e == NodeEvent::EthNodeOk).await;

        // The node exits on its own while the transport is being reset.
        node.stop(None).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped = events
            .drain()
            .into_iter()
            .filter(|e| *e == NodeEvent::Stopped)
            .count();
        assert_eq!(stopped, 1);
        assert_eq!(node.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn restart_reuses_merged_options() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(home.path(), READY_NODE);
        let (node, _logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();

        assert!(node
            .start(Some(SpawnOptions::new().with("port", "30304")))
            .await
            .unwrap());
        collect_until(&mut events, |e| *e == NodeEvent::EthNodeOk).await;
        let first_pid = node.pid().await;

        assert!(node.restart(Some(Duration::from_millis(10))).await.unwrap());

        let seen = collect_until(&mut events, |e| *e == NodeEvent::Started).await;
        let names: Vec<_> = seen.iter().map(NodeEvent::name).collect();
        assert!(names.starts_with(&["STOPPING", "STOPPED"]));
        assert!(names.contains(&"STARTING"));
        assert_ne!(node.pid().await, first_pid);
        assert_eq!(node.options().await.value("port"), Some("30304"));
        assert_eq!(node.stats().starts, 2);

        node.stop(None).await;
    }

    #[tokio::test]
    async fn bin_dir_retargets_provisioner() {
        let home = tempfile::tempdir().unwrap();
        fake_node(home.path(), READY_NODE);
        let (node, _logger) = supervisor(
            short_timeout(),
            FakeProvisioner::found("/nonexistent/bin/geth"),
            FakeApi::healthy(),
            home.path(),
        );
        let mut events = node.subscribe();

        node.set_bin_dir(home.path()).await;
        assert!(node.start(None).await.unwrap());
        collect_until(&mut events, |e| *e == NodeEvent::Started).await;

        node.stop(None).await;
    }

    #[tokio::test]
    async fn replaced_logger_receives_node_output() {
        let home = tempfile::tempdir().unwrap();
        let binary = fake_node(home.path(), READY_NODE);
        let (node, first) = supervisor(
            short_timeout(),
            FakeProvisioner::found(binary),
            FakeApi::healthy(),
            home.path(),
        );
        let second = Arc::new(MemoryLogger::new());
        node.set_logger(second.clone());
        let mut events = node.subscribe();

        assert!(node.start(None).await.unwrap());
        collect_until(&mut events, |e| *e == NodeEvent::EthNodeOk).await;

        assert!(first.lines().is_empty());
        assert!(second
            .messages(LogLevel::Info)
            .iter()
            .any(|m| m.contains("IPC endpoint opened")));

        node.stop(None).await;
    }
}

#[cfg(unix)]
mod ipc {
    use super::*;
    use node_supervisor::api::IpcControlClient;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    /// Answer the compatibility check, then hang up.
    fn serve_then_hang_up(listener: UnixListener) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            for _ in 0..2 {
                let line = lines.next_line().await.unwrap().unwrap();
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                let result = match request["method"].as_str().unwrap() {
                    "web3_clientVersion" => "Geth/v1.4.9-stable/linux/go1.6.2",
                    _ => "1",
                };
                let response =
                    serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
                let mut out = serde_json::to_string(&response).unwrap();
                out.push('\n');
                writer.write_all(out.as_bytes()).await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn attached_node_hanging_up_lowers_api() {
        let home = tempfile::tempdir().unwrap();
        let paths = defaults(home.path());
        std::fs::create_dir_all(&paths.datadir).unwrap();
        serve_then_hang_up(UnixListener::bind(&paths.ipc_path).unwrap());

        let node = NodeSupervisor::builder(NodeConfig::default())
            .provisioner(FakeProvisioner::found("/nonexistent/bin/geth"))
            .control_api(Arc::new(IpcControlClient::new()))
            .logger(Arc::new(MemoryLogger::new()))
            .default_paths(paths)
            .build();
        let mut events = node.subscribe();
        let mut status = node.watch_status();

        node.connect_to_local().await.unwrap();

        let seen = collect_until(&mut events, |e| *e == NodeEvent::IpcDisconnected).await;
        assert_eq!(
            seen,
            vec![
                NodeEvent::IpcConnected,
                NodeEvent::EthNodeOk,
                NodeEvent::IpcDisconnected
            ]
        );
        status.wait_for(|s| !s.api).await.unwrap();
        assert_eq!(node.transport_state(), TransportState::Failed);

        node.stop(None).await;
    }
}
