//! Node binary provisioning.
//!
//! The supervisor only needs a path to a runnable executable and the
//! version that executable is expected to report. How it gets onto disk is
//! up to the [`BinaryProvisioner`] implementation.

mod local;

pub use local::*;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;

/// Errors from binary provisioning.
#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    /// No executable at the expected location.
    #[error("Node binary not found at {0}")]
    NotFound(PathBuf),
    /// The executable exists but failed its self-check.
    #[error("Node binary at {path} failed verification ({status})")]
    Corrupted { path: PathBuf, status: ExitStatus },
    /// I/O error while checking the binary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Guarantees a runnable node executable.
#[async_trait]
pub trait BinaryProvisioner: Send + Sync {
    /// Make sure the executable is present and runnable, returning its path.
    async fn ensure(&self) -> Result<PathBuf, ProvisionError>;

    /// Version string the running node is expected to report.
    fn version(&self) -> &str;

    /// A provisioner of the same kind targeting another directory.
    fn with_target(&self, dir: PathBuf) -> Arc<dyn BinaryProvisioner>;
}
