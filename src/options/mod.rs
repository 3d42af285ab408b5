//! Node startup options.
//!
//! Default data directory and IPC endpoint derivation, the ordered
//! option set passed to the node, and the store that merges defaults,
//! required flags and caller input.

mod paths;
mod spawn_options;
mod store;

pub use paths::*;
pub use spawn_options::*;
pub use store::*;

/// Option key for the node data directory.
pub const DATADIR_KEY: &str = "datadir";

/// Option key for the IPC endpoint path.
pub const IPC_PATH_KEY: &str = "ipcpath";

/// Reserved option key redirecting the binary provisioner.
///
/// Never forwarded to the node; the store strips it on every merge.
pub const BIN_DIR_KEY: &str = "bin-dir";

/// Errors raised while deriving or merging options.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    /// The host OS has no known default layout.
    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),
    /// No home directory could be determined.
    #[error("Home directory not found")]
    MissingHome,
    /// `%APPDATA%` is not set on Windows.
    #[error("APPDATA environment variable not set")]
    MissingAppData,
}
