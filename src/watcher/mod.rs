//! Node output watching.
//!
//! The node's stdout and stderr are pumped into [`OutputStream`]s. During
//! boot a single startup filter classifies stderr lines into
//! [`StartupSignal`]s; once the node is ready it is swapped for a
//! steady-state filter that only forwards lines to the logger.

mod classify;
mod log_watcher;
mod registry;
mod stream;

pub use classify::*;
pub use log_watcher::*;
pub use registry::*;
pub use stream::*;
