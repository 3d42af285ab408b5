//! Provisioner for a binary already installed in a directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use super::{BinaryProvisioner, ProvisionError};

/// Default executable name, without platform suffix.
pub const DEFAULT_BINARY_NAME: &str = "geth";

/// Looks up `<dir>/<name>` and verifies it by running `<binary> version`.
#[derive(Debug, Clone)]
pub struct LocalBinary {
    dir: PathBuf,
    name: String,
    version: String,
}

impl LocalBinary {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: DEFAULT_BINARY_NAME.to_string(),
            version: version.into(),
        }
    }

    /// Use a different executable name.
    #[must_use]
    pub fn binary_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `<data_local_dir>/node-supervisor/bin`, falling back to `./bin`.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("node-supervisor").join("bin"))
            .unwrap_or_else(|| PathBuf::from("bin"))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the executable, with `.exe` on Windows.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        let file = if cfg!(windows) {
            format!("{}.exe", self.name)
        } else {
            self.name.clone()
        };
        self.dir.join(file)
    }
}

#[async_trait]
impl BinaryProvisioner for LocalBinary {
    async fn ensure(&self) -> Result<PathBuf, ProvisionError> {
        let path = self.path();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ProvisionError::NotFound(path)),
        }

        let status = Command::new(&path)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(ProvisionError::Corrupted { path, status });
        }

        tracing::debug!(path = %path.display(), "Node binary verified");
        Ok(path)
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn with_target(&self, dir: PathBuf) -> Arc<dyn BinaryProvisioner> {
        Arc::new(Self {
            dir,
            ..self.clone()
        })
    }
}
