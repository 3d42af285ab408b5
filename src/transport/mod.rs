//! Control API transport monitoring.
//!
//! ```text
//! connect(endpoint)
//!     |-- ok ----> IPC_CONNECTED --> compatibility check --> ETH_NODE_OK, api=true
//!     |                                   |-- version mismatch: ERROR (continues)
//!     |                                   `-- network mismatch: FATAL (api stays false)
//!     `-- error -> reset client, api=false, IPC_DISCONNECTED
//! ```

mod compat;
mod monitor;

pub use compat::*;
pub use monitor::*;
