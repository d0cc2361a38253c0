//! Bluetooth Module
//!
//! Discovery and connection coordination on top of an abstract radio stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Coordinator                         │
//! │  (Composition root - public API for the presentation)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌────────────┐ ┌─────────────┐ ┌────────────┐ ┌────────────┐
//! │  Adapter   │ │   Scanner   │ │ Connection │ │ Event bus  │
//! │            │ │             │ │            │ │            │
//! │ - power on │ │ - scan      │ │ - bond     │ │ - radio    │
//! │ - state    │ │   window    │ │ - connect  │ │   events   │
//! │   changes  │ │ - resync    │ │ - timeouts │ │ - teardown │
//! └────────────┘ └─────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Radio stack and permission traits
//! - [`event_bus`] - Radio notifications and subscription groups
//! - [`adapter`] - Adapter bring-up and state tracking
//! - [`scanner`] - Bounded scan sessions
//! - [`connection`] - Per-device bond / connect / disconnect
//! - [`service`] - Main coordinator
//! - [`simulated`] - In-process radio stack

pub mod adapter;
pub mod connection;
pub mod event_bus;
pub mod radio;
pub mod scanner;
pub mod service;
pub mod simulated;

// Re-export main service for convenience
pub use service::Coordinator;
