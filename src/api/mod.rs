//! Control API of the running node.
//!
//! [`ControlApi`] is the narrow surface the supervisor needs: open a
//! connection to the IPC endpoint, three read-only queries, and a reset
//! that discards a stale connection. [`IpcControlClient`] is a minimal
//! adapter speaking newline-delimited JSON-RPC over the endpoint.

mod ipc_client;

pub use ipc_client::*;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Errors from control API calls.
#[derive(Debug, thiserror::Error)]
pub enum ControlApiError {
    /// The IPC transport failed (connect, read or write).
    #[error("IPC transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A call was made before `connect` succeeded or after `reset`.
    #[error("Not connected to the node")]
    NotConnected,

    /// The operation timed out.
    #[error("IPC timeout after {0}ms")]
    Timeout(u64),

    /// The node answered with an error object.
    #[error("Node returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Failed to serialize or deserialize a message.
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The response was empty or did not carry a usable result.
    #[error("Invalid response from node")]
    InvalidResponse,
}

impl ControlApiError {
    /// Whether the error means the transport itself is unusable.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NotConnected | Self::Timeout(_)
        )
    }
}

/// Request/response access to the node's control API.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Open (or reopen) the transport to `endpoint`.
    async fn connect(&self, endpoint: &Path) -> Result<(), ControlApiError>;

    /// Build version string, e.g. `Geth/v1.4.9-stable/linux/go1.6.2`.
    async fn node_version(&self) -> Result<String, ControlApiError>;

    /// Network identifier, e.g. `"1"` for mainnet.
    async fn network_id(&self) -> Result<String, ControlApiError>;

    /// Data directory the node is using.
    async fn data_dir(&self) -> Result<PathBuf, ControlApiError>;

    /// Resolves once the current connection is lost.
    ///
    /// Returns immediately when no connection is open.
    async fn closed(&self);

    /// Drop the current transport and any in-flight state.
    async fn reset(&self);
}
