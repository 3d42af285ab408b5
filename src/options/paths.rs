//! Platform-dependent default locations.

use std::path::{Path, PathBuf};

use super::OptionsError;

/// Named pipe the node listens on under Windows.
pub const WINDOWS_IPC_PIPE: &str = r"\\.\pipe\geth.ipc";

/// IPC socket file name inside the data directory.
pub const IPC_SOCKET_NAME: &str = "geth.ipc";

/// Supported host platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Detect the platform this binary was compiled for.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::UnsupportedPlatform`] outside Linux, macOS and Windows.
    pub fn current() -> Result<Self, OptionsError> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map an OS identifier (as in `std::env::consts::OS`) to a platform.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::UnsupportedPlatform`] for any other identifier.
    pub fn from_os(os: &str) -> Result<Self, OptionsError> {
        match os {
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::MacOs),
            "windows" => Ok(Self::Windows),
            other => Err(OptionsError::UnsupportedPlatform(other.to_string())),
        }
    }

    /// Default node data directory.
    ///
    /// `appdata` is only consulted on Windows, `home` everywhere else.
    #[must_use]
    pub fn datadir(self, home: &Path, appdata: &Path) -> PathBuf {
        match self {
            Self::Linux => home.join(".ethereum"),
            Self::MacOs => home.join("Library").join("Ethereum"),
            Self::Windows => appdata.join("Ethereum"),
        }
    }

    /// Default IPC endpoint for a node using `datadir`.
    #[must_use]
    pub fn ipc_path(self, datadir: &Path) -> PathBuf {
        match self {
            Self::Windows => PathBuf::from(WINDOWS_IPC_PIPE),
            Self::Linux | Self::MacOs => datadir.join(IPC_SOCKET_NAME),
        }
    }
}

/// The pair of defaults injected into the first option merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPaths {
    pub datadir: PathBuf,
    pub ipc_path: PathBuf,
}

impl DefaultPaths {
    /// Compute defaults for an explicit platform and base directories.
    #[must_use]
    pub fn for_platform(platform: Platform, home: &Path, appdata: &Path) -> Self {
        let datadir = platform.datadir(home, appdata);
        let ipc_path = platform.ipc_path(&datadir);
        Self { datadir, ipc_path }
    }

    /// Compute defaults for the running host.
    ///
    /// # Errors
    ///
    /// Fails on unsupported platforms, or when the home directory
    /// (`%APPDATA%` on Windows) cannot be determined.
    pub fn detect() -> Result<Self, OptionsError> {
        let platform = Platform::current()?;
        let (home, appdata) = match platform {
            Platform::Windows => {
                let appdata = std::env::var_os("APPDATA").ok_or(OptionsError::MissingAppData)?;
                (PathBuf::new(), PathBuf::from(appdata))
            }
            Platform::Linux | Platform::MacOs => {
                (dirs::home_dir().ok_or(OptionsError::MissingHome)?, PathBuf::new())
            }
        };
        Ok(Self::for_platform(platform, &home, &appdata))
    }
}

/// Default node data directory for the running host.
///
/// # Errors
///
/// See [`DefaultPaths::detect`].
pub fn default_datadir() -> Result<PathBuf, OptionsError> {
    DefaultPaths::detect().map(|paths| paths.datadir)
}

/// Default IPC endpoint for the running host.
///
/// # Errors
///
/// See [`DefaultPaths::detect`].
pub fn default_ipc_path() -> Result<PathBuf, OptionsError> {
    DefaultPaths::detect().map(|paths| paths.ipc_path)
}
