//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::SpawnOptions;

/// One required node flag, emitted as `--name [value]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl NodeFlag {
    #[must_use]
    pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.map(str::to_string),
        }
    }
}

fn default_node_flags() -> Vec<NodeFlag> {
    vec![
        NodeFlag::new("fast", None),
        NodeFlag::new("cache", Some("512")),
        NodeFlag::new("ipcapi", Some("admin,eth,net,web3,personal")),
    ]
}

/// Configuration for the node supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Substring the node build version must contain.
    pub required_version: String,
    /// Network identifier the node must report.
    pub network_id: String,
    /// Seconds to wait for the node to report readiness.
    pub startup_timeout_secs: u64,
    /// Milliseconds of binary resolution before `DOWNLOADING_BINARY`.
    pub binary_notice_ms: u64,
    /// Default delay between stop and start in `restart`.
    pub restart_delay_ms: u64,
    /// Seconds to wait after the stop signal before force-killing.
    pub stop_grace_secs: u64,
    /// Flags passed to every node launch, in order.
    pub node_flags: Vec<NodeFlag>,
    /// Directory holding the node executable.
    pub bin_dir: Option<PathBuf>,
    /// Executable name without platform suffix.
    pub binary_name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            required_version: "v1.4.9".to_string(),
            network_id: "1".to_string(),
            startup_timeout_secs: 20,
            binary_notice_ms: 500,
            restart_delay_ms: 5000,
            stop_grace_secs: 10,
            node_flags: default_node_flags(),
            bin_dir: None,
            binary_name: crate::provision::DEFAULT_BINARY_NAME.to_string(),
        }
    }
}

impl NodeConfig {
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    #[must_use]
    pub fn binary_notice(&self) -> Duration {
        Duration::from_millis(self.binary_notice_ms)
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// The required flags as an ordered option set.
    #[must_use]
    pub fn required_options(&self) -> SpawnOptions {
        self.node_flags
            .iter()
            .map(|flag| (flag.name.clone(), flag.value.clone()))
            .collect()
    }
}
