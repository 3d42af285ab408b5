//! Node lifecycle supervision.

mod global;
mod node;
mod process;
mod state;

pub use global::*;
pub use node::*;
pub use process::*;
pub use state::*;
