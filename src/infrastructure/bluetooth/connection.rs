//! BLE Connection Module
//!
//! Per-device connect, bond and disconnect requests. Each call is a single
//! best-effort attempt; completion is observed through radio events, which
//! the coordinator routes back here.

use crate::domain::models::{AppEvent, ConnectionStatus, MessageSeverity, StatusMessage};
use crate::domain::settings::ConnectionSettings;
use crate::domain::state::StateStore;
use crate::error::{BondError, ConnectionError, DisconnectionError, RadioError};
use crate::infrastructure::bluetooth::radio::RadioStack;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bond before connecting (required on some platforms)
    pub require_bonding: bool,
    /// Upper bound for each bond/connect/disconnect request
    pub operation_timeout: Option<Duration>,
    /// Passed to the radio stack's disconnect
    pub force_disconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionSettings::default().into()
    }
}

impl From<ConnectionSettings> for ConnectionConfig {
    fn from(settings: ConnectionSettings) -> Self {
        Self {
            require_bonding: settings.require_bonding,
            operation_timeout: settings.operation_timeout_ms.map(Duration::from_millis),
            force_disconnect: settings.force_disconnect,
        }
    }
}

#[derive(Clone, Copy)]
enum Step {
    Bond,
    Connect,
}

#[derive(Clone)]
pub struct ConnectionController {
    radio: Arc<dyn RadioStack>,
    store: Arc<StateStore>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    config: ConnectionConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ConnectionController {
    pub fn new(
        radio: Arc<dyn RadioStack>,
        store: Arc<StateStore>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            radio,
            store,
            event_sender,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Request a connection to `id`, bonding first when configured to.
    ///
    /// `Ok` means the radio stack accepted the request; the connected set is
    /// updated once `PeripheralConnected` arrives.
    pub async fn connect(&self, id: &str) -> Result<(), ConnectionError> {
        let state = self.store.adapter_state();
        if !state.is_powered_on() {
            return Err(ConnectionError::AdapterNotReady(state));
        }
        let Some(_claim) = InFlight::claim(&self.in_flight, id) else {
            return Err(ConnectionError::InProgress(id.to_string()));
        };

        info!("Connecting to peripheral {}", id);
        self.send_log(&format!("Connecting to {}...", id), MessageSeverity::Info);

        let result = self.bond_then_connect(id).await;

        if let Err(e) = &result {
            error!("Connection to {} failed: {}", id, e);
            self.send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
            self.send_status(id, ConnectionStatus::Error);
        }
        result
    }

    async fn bond_then_connect(&self, id: &str) -> Result<(), ConnectionError> {
        if self.config.require_bonding {
            self.run(id, Step::Bond).await?;
        }
        self.run(id, Step::Connect).await
    }

    async fn run(&self, id: &str, step: Step) -> Result<(), ConnectionError> {
        let (operation, result) = match step {
            Step::Bond => ("bond", self.bounded(self.radio.bond(id)).await),
            Step::Connect => ("connect", self.bounded(self.radio.connect(id)).await),
        };
        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(match step {
                Step::Bond => BondError {
                    id: id.to_string(),
                    source,
                }
                .into(),
                Step::Connect => ConnectionError::Connect {
                    id: id.to_string(),
                    source,
                },
            }),
            None => Err(ConnectionError::Timeout {
                id: id.to_string(),
                operation,
                timeout: self.config.operation_timeout.unwrap_or_default(),
            }),
        }
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), DisconnectionError> {
        let state = self.store.adapter_state();
        if !state.is_powered_on() {
            return Err(DisconnectionError::AdapterNotReady(state));
        }

        info!("Disconnecting peripheral {}", id);
        let result = match self
            .bounded(self.radio.disconnect(id, self.config.force_disconnect))
            .await
        {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(DisconnectionError::Disconnect {
                id: id.to_string(),
                source,
            }),
            None => Err(DisconnectionError::Timeout {
                id: id.to_string(),
                timeout: self.config.operation_timeout.unwrap_or_default(),
            }),
        };

        if let Err(e) = &result {
            error!("Disconnect from {} failed: {}", id, e);
            self.send_log(&format!("Disconnect failed: {}", e), MessageSeverity::Error);
        }
        result
    }

    /// `PeripheralConnected` arrived for `id`.
    pub fn on_connected(&self, id: &str) {
        let added = self.store.update(|s| s.registry.mark_connected(id));
        if added {
            info!("Peripheral {} connected", id);
        }
        self.send_status(id, ConnectionStatus::Connected);
        self.send_log(&format!("Connected to {}", id), MessageSeverity::Success);
    }

    /// `PeripheralDisconnected` arrived for `id`.
    pub fn on_disconnected(&self, id: &str) {
        let removed = self.store.update(|s| s.registry.mark_disconnected(id));
        if removed {
            info!("Peripheral {} disconnected", id);
        } else {
            warn!("Disconnect reported for {} which was not connected", id);
        }
        self.send_status(id, ConnectionStatus::Disconnected);
        self.send_log(&format!("Disconnected from {}", id), MessageSeverity::Success);
    }

    /// `PeripheralBonded` arrived for `id`.
    pub fn on_bonded(&self, id: &str) {
        info!("Peripheral {} bonded", id);
        self.send_status(id, ConnectionStatus::Bonded);
        self.send_log(&format!("Bonded with {}", id), MessageSeverity::Success);
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        lock_ids(&self.in_flight).contains(id)
    }

    /// `None` means the configured timeout expired.
    async fn bounded<F>(&self, request: F) -> Option<Result<(), RadioError>>
    where
        F: Future<Output = Result<(), RadioError>>,
    {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.ok(),
            None => Some(request.await),
        }
    }

    fn send_status(&self, id: &str, status: ConnectionStatus) {
        let _ = self.event_sender.send(AppEvent::ConnectionStatus {
            id: id.to_string(),
            status,
        });
    }

    /// Send a log message
    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

/// Marks a connect for one id as running until dropped, including when the
/// caller abandons the `connect` future.
struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlight {
    fn claim(ids: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        if !lock_ids(ids).insert(id.to_string()) {
            return None;
        }
        Some(Self {
            ids: ids.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock_ids(&self.ids).remove(&self.id);
    }
}

fn lock_ids(ids: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    ids.lock().unwrap_or_else(|e| e.into_inner())
}
