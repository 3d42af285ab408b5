//! Typed events and health status published by the supervisor.

mod bus;
mod status;

pub use bus::*;
pub use status::*;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Component reported by [`NodeEvent::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// The node executable could not be provisioned.
    Binary,
    /// The node process failed to spawn or crashed at the OS level.
    NodeProcess,
}

/// Lifecycle and health notifications about the supervised node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeEvent {
    Starting,
    Stopping,
    Stopped,
    Failed { component: Component },
    /// Binary resolution is taking longer than the notice threshold.
    DownloadingBinary,
    BinaryCorrupted { error: String },
    /// The node logged that its IPC endpoint is open.
    Started,
    /// Non-fatal problem: unexpected exit, startup timeout, version mismatch.
    Error { message: String },
    Fatal { message: String },
    TimeNotSynced { message: String },
    IpcConnected,
    IpcDisconnected,
    /// The compatibility check passed.
    EthNodeOk,
}

impl NodeEvent {
    /// Stable upper-case name of the event kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed { .. } => "FAILED",
            Self::DownloadingBinary => "DOWNLOADING_BINARY",
            Self::BinaryCorrupted { .. } => "BINARY_CORRUPTED",
            Self::Started => "STARTED",
            Self::Error { .. } => "ERROR",
            Self::Fatal { .. } => "FATAL",
            Self::TimeNotSynced { .. } => "TIME_NOT_SYNCED",
            Self::IpcConnected => "IPC_CONNECTED",
            Self::IpcDisconnected => "IPC_DISCONNECTED",
            Self::EthNodeOk => "ETH_NODE_OK",
        }
    }

    /// Payload text carried by the event, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::BinaryCorrupted { error: text }
            | Self::Error { message: text }
            | Self::Fatal { message: text }
            | Self::TimeNotSynced { message: text } => Some(text.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { component } => write!(f, "{}({component:?})", self.name()),
            other => match other.detail() {
                Some(detail) => write!(f, "{}: {}", other.name(), detail.trim_end()),
                None => f.write_str(other.name()),
            },
        }
    }
}
