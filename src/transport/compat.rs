//! Post-connect compatibility check.

use crate::api::{ControlApi, ControlApiError};
use crate::event::{EventBus, NodeEvent};
use crate::logging::NodeLogger;

/// Expected node build and network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityCheck {
    /// Substring the node's build version must contain.
    pub required_version: String,
    /// Exact network identifier the node must report.
    pub network_id: String,
}

impl CompatibilityCheck {
    #[must_use]
    pub fn new(required_version: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            required_version: required_version.into(),
            network_id: network_id.into(),
        }
    }

    /// Query the node and report the outcome as events.
    ///
    /// A version mismatch publishes a non-fatal `ERROR` and continues. A
    /// network mismatch publishes `FATAL` and yields `Ok(false)`. Otherwise
    /// `ETH_NODE_OK` is published and `Ok(true)` returned.
    ///
    /// # Errors
    ///
    /// Returns the first control API error from either query.
    pub async fn run(
        &self,
        api: &dyn ControlApi,
        events: &EventBus,
        logger: &dyn NodeLogger,
    ) -> Result<bool, ControlApiError> {
        let (build_version, network_id) = tokio::try_join!(api.node_version(), api.network_id())?;

        if !build_version.contains(&self.required_version) {
            let message = format!(
                "required node version: {}, found: {build_version}",
                self.required_version
            );
            logger.warn(&message);
            events.publish(NodeEvent::Error { message });
        }

        if network_id != self.network_id {
            let message = format!(
                "required network: {}, found: {network_id}",
                self.network_id
            );
            logger.error(&message);
            events.publish(NodeEvent::Fatal { message });
            return Ok(false);
        }

        events.publish(NodeEvent::EthNodeOk);
        Ok(true)
    }
}
