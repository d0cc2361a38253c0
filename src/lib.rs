//! Discovery, bonding and connection coordination for nearby radio
//! peripherals.
//!
//! The [`Coordinator`] owns adapter state, one scan session at a time and the
//! discovered / bonded / connected device lists. It drives an abstract
//! [`RadioStack`] and publishes a [`CoordinatorSnapshot`] that a presentation
//! layer can watch.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use domain::models::{
    AdapterState, AppEvent, CoordinatorSnapshot, PeripheralDescriptor, ScanRequest,
};
pub use infrastructure::bluetooth::radio::{PermissionProvider, RadioStack};
pub use infrastructure::bluetooth::Coordinator;
