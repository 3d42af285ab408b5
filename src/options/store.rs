//! Option merging for a supervision session.

use std::path::PathBuf;

use super::{DefaultPaths, OptionsError, SpawnOptions, BIN_DIR_KEY, DATADIR_KEY, IPC_PATH_KEY};

/// Result of [`OptionStore::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedOptions {
    /// The stored option set after the call.
    pub options: SpawnOptions,
    /// Binary directory override extracted from the input, if any.
    pub bin_dir: Option<PathBuf>,
}

/// Holds the option set used to launch the node.
///
/// The first merge layers, in increasing precedence, the default paths,
/// the required node flags and the caller's options. Afterwards a call
/// without input returns the stored set, and a call with input replaces
/// the stored set with exactly that input; defaults are not re-applied.
#[derive(Debug, Clone)]
pub struct OptionStore {
    options: SpawnOptions,
    required: SpawnOptions,
    defaults: Option<DefaultPaths>,
}

impl OptionStore {
    /// Create a store whose defaults are detected on first merge.
    #[must_use]
    pub fn new(required: SpawnOptions) -> Self {
        Self {
            options: SpawnOptions::new(),
            required,
            defaults: None,
        }
    }

    /// Create a store with explicit default paths.
    #[must_use]
    pub fn with_defaults(required: SpawnOptions, defaults: DefaultPaths) -> Self {
        Self {
            options: SpawnOptions::new(),
            required,
            defaults: Some(defaults),
        }
    }

    /// Merge or replace the stored options.
    ///
    /// # Errors
    ///
    /// Only the first merge can fail, when default paths cannot be derived
    /// for the host.
    pub fn set(&mut self, options: Option<SpawnOptions>) -> Result<MergedOptions, OptionsError> {
        if !self.options.is_empty() {
            match options {
                None => {
                    return Ok(MergedOptions {
                        options: self.options.clone(),
                        bin_dir: None,
                    })
                }
                Some(replacement) => self.options = replacement,
            }
        } else {
            let defaults = match &self.defaults {
                Some(defaults) => defaults.clone(),
                None => DefaultPaths::detect()?,
            };
            let mut merged = SpawnOptions::new()
                .with(DATADIR_KEY, defaults.datadir.to_string_lossy())
                .with(IPC_PATH_KEY, defaults.ipc_path.to_string_lossy());
            merged.extend(&self.required);
            if let Some(caller) = options {
                merged.extend(&caller);
            }
            self.options = merged;
        }

        let bin_dir = self.options.remove(BIN_DIR_KEY).flatten().map(PathBuf::from);
        if let Some(dir) = &bin_dir {
            tracing::debug!(dir = %dir.display(), "Binary directory override");
        }

        Ok(MergedOptions {
            options: self.options.clone(),
            bin_dir,
        })
    }

    /// Default paths: the configured ones, or those detected for the host.
    ///
    /// # Errors
    ///
    /// See [`DefaultPaths::detect`].
    pub fn default_paths(&self) -> Result<DefaultPaths, OptionsError> {
        match &self.defaults {
            Some(defaults) => Ok(defaults.clone()),
            None => DefaultPaths::detect(),
        }
    }

    /// Currently stored options.
    #[must_use]
    pub fn current(&self) -> &SpawnOptions {
        &self.options
    }

    /// The IPC endpoint the stored options point the node at.
    #[must_use]
    pub fn ipc_path(&self) -> Option<PathBuf> {
        self.options.value(IPC_PATH_KEY).map(PathBuf::from)
    }

    /// Command-line arguments for the stored options.
    #[must_use]
    pub fn to_argv(&self) -> Vec<String> {
        self.options.to_argv()
    }
}
