//! Process-wide supervisor instance.

use std::sync::OnceLock;

use super::{NodeSupervisor, SupervisorError};

static SUPERVISOR: OnceLock<NodeSupervisor> = OnceLock::new();

/// Install the process-wide supervisor.
///
/// # Errors
///
/// Returns [`SupervisorError::AlreadyInitialized`] if one is already
/// installed; the passed supervisor is dropped.
pub fn init(supervisor: NodeSupervisor) -> Result<&'static NodeSupervisor, SupervisorError> {
    SUPERVISOR
        .set(supervisor)
        .map_err(|_| SupervisorError::AlreadyInitialized)?;
    SUPERVISOR.get().ok_or(SupervisorError::AlreadyInitialized)
}

/// The process-wide supervisor, if [`init`] was called.
#[must_use]
pub fn shared() -> Option<&'static NodeSupervisor> {
    SUPERVISOR.get()
}
