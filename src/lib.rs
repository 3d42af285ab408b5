//! Node Supervisor - launch, watch and attach to a local Ethereum node.

pub mod api;
pub mod config;
pub mod display;
pub mod event;
pub mod logging;
pub mod options;
pub mod provision;
pub mod supervisor;
pub mod transport;
pub mod watcher;
