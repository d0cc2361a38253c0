//! Error types for the coordinator.
//!
//! Radio-stack failures are carried as [`RadioError`] and wrapped by the
//! operation that hit them, so callers can tell a failed bond from a failed
//! connect without string matching.

use crate::domain::models::{AdapterState, Capability};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the radio stack for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio stack unavailable")]
    Unavailable,

    #[error("unknown peripheral {0}")]
    UnknownPeripheral(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitializationError {
    #[error("failed to query adapter state: {0}")]
    StateQuery(#[source] RadioError),

    #[error("failed to start radio services: {0}")]
    Start(#[source] RadioError),

    #[error("failed to enable radio: {0}")]
    Enable(#[source] RadioError),

    #[error("adapter did not power on (state: {0})")]
    NotPoweredOn(AdapterState),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("authorization request failed: {0}")]
    Authorization(#[source] RadioError),

    #[error("failed to snapshot known devices: {0}")]
    Snapshot(#[source] RadioError),

    #[error("scan request rejected: {0}")]
    Radio(#[source] RadioError),
}

/// Capabilities the user declined. The scan still runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("permission needed for {denied:?}")]
pub struct PermissionWarning {
    pub denied: Vec<Capability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bonding with {id} failed: {source}")]
pub struct BondError {
    pub id: String,
    #[source]
    pub source: RadioError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("adapter is not powered on (state: {0})")]
    AdapterNotReady(AdapterState),

    #[error("a connect request for {0} is already in flight")]
    InProgress(String),

    #[error(transparent)]
    Bond(#[from] BondError),

    #[error("connecting to {id} failed: {source}")]
    Connect {
        id: String,
        #[source]
        source: RadioError,
    },

    #[error("{operation} for {id} timed out after {timeout:?}")]
    Timeout {
        id: String,
        operation: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectionError {
    #[error("adapter is not powered on (state: {0})")]
    AdapterNotReady(AdapterState),

    #[error("disconnecting {id} failed: {source}")]
    Disconnect {
        id: String,
        #[source]
        source: RadioError,
    },

    #[error("disconnect for {id} timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },
}
