//! Radio Stack Interface
//!
//! The coordinator drives the platform radio through these traits. Scanning
//! over the air, pairing cryptography and link-layer connections all live on
//! the other side of this boundary.

use crate::domain::models::{
    AdapterState, Authorization, Capability, PeripheralDescriptor, ScanRequest,
};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::event_bus::EventBus;
use async_trait::async_trait;
use std::collections::HashMap;

pub type RadioResult<T> = Result<T, RadioError>;

#[async_trait]
pub trait RadioStack: Send + Sync {
    /// Bus on which the stack publishes its notifications.
    fn events(&self) -> EventBus;

    async fn check_state(&self) -> RadioResult<AdapterState>;

    /// Start the stack's internal services.
    async fn start(&self) -> RadioResult<()>;

    /// Ask the platform to power the adapter on.
    async fn enable_radio(&self) -> RadioResult<()>;

    /// Begin a bounded scan. The stack publishes `ScanStopped` when the
    /// duration elapses.
    async fn scan(&self, request: &ScanRequest) -> RadioResult<()>;

    async fn stop_scan(&self) -> RadioResult<()>;

    async fn list_bonded(&self) -> RadioResult<Vec<PeripheralDescriptor>>;

    async fn list_connected(&self) -> RadioResult<Vec<PeripheralDescriptor>>;

    async fn list_discovered(&self) -> RadioResult<Vec<PeripheralDescriptor>>;

    async fn bond(&self, id: &str) -> RadioResult<()>;

    async fn connect(&self, id: &str) -> RadioResult<()>;

    async fn disconnect(&self, id: &str, force: bool) -> RadioResult<()>;
}

/// Runtime permission prompts, answered per capability.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request_authorization(
        &self,
        capabilities: &[Capability],
    ) -> RadioResult<HashMap<Capability, Authorization>>;
}

/// Capabilities from `requested` that were denied or left unanswered.
pub fn denied_capabilities(
    requested: &[Capability],
    answers: &HashMap<Capability, Authorization>,
) -> Vec<Capability> {
    requested
        .iter()
        .copied()
        .filter(|c| answers.get(c) != Some(&Authorization::Granted))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_capabilities() {
        let answers = HashMap::from([
            (Capability::Scan, Authorization::Granted),
            (Capability::Connect, Authorization::Denied),
        ]);
        assert_eq!(
            denied_capabilities(&Capability::SCAN_SET, &answers),
            vec![Capability::Connect, Capability::Advertise]
        );
    }
}
