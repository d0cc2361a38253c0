use serde::{Deserialize, Serialize};
use std::fmt;

/// Power/availability state of the local radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
    Resetting,
}

impl AdapterState {
    pub fn is_powered_on(self) -> bool {
        self == AdapterState::PoweredOn
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "off",
            Self::PoweredOn => "on",
            Self::Resetting => "resetting",
        };
        f.write_str(s)
    }
}

/// Advertisement payload a peripheral broadcasts before connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingData {
    pub local_name: Option<String>,
    pub is_connectable: bool,
    pub tx_power_level: Option<i16>,
    #[serde(default)]
    pub service_uuids: Vec<String>,
}

/// One physical peripheral, keyed by `id` in every device set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralDescriptor {
    pub id: String,
    /// Name cached by the radio stack (e.g. from a previous bond).
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub advertising: AdvertisingData,
}

impl PeripheralDescriptor {
    /// A bare descriptor, used when only the id of a device is known.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            advertising: AdvertisingData::default(),
        }
    }

    pub fn connectable(id: impl Into<String>) -> Self {
        let mut descriptor = Self::new(id);
        descriptor.advertising.is_connectable = true;
        descriptor
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.advertising.local_name = Some(name.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn is_connectable(&self) -> bool {
        self.advertising.is_connectable
    }

    /// Advertised name takes precedence over the cached one.
    pub fn display_name(&self) -> Option<&str> {
        self.advertising
            .local_name
            .as_deref()
            .or(self.name.as_deref())
    }
}

/// Runtime capabilities the permission layer can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Scan,
    Connect,
    Advertise,
}

impl Capability {
    pub const SCAN_SET: [Capability; 3] =
        [Capability::Scan, Capability::Connect, Capability::Advertise];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authorization {
    Granted,
    Denied,
}

/// How eagerly the radio stack reports advertisements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Aggressive,
    Sticky,
}

/// Parameters for one bounded discovery window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Service UUID filters; empty means every advertiser.
    pub filters: Vec<String>,
    pub duration_secs: u32,
    pub allow_duplicates: bool,
    pub match_mode: MatchMode,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            duration_secs: 30,
            allow_duplicates: false,
            match_mode: MatchMode::Aggressive,
        }
    }
}

/// Observable coordinator state handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub adapter_state: AdapterState,
    pub initialized: bool,
    pub initializing: bool,
    pub scanning: bool,
    pub discovered: Vec<PeripheralDescriptor>,
    pub bonded: Vec<PeripheralDescriptor>,
    pub connected: Vec<PeripheralDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ConnectionStatus { id: String, status: ConnectionStatus },
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Bonded,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_advertised() {
        let d = PeripheralDescriptor::connectable("D1").with_name("cached");
        assert_eq!(d.display_name(), Some("cached"));

        let d = d.with_local_name("advertised");
        assert_eq!(d.display_name(), Some("advertised"));

        assert_eq!(PeripheralDescriptor::new("D2").display_name(), None);
    }

    #[test]
    fn test_adapter_state_serde() {
        let json = serde_json::to_string(&AdapterState::PoweredOn).unwrap();
        assert_eq!(json, "\"PoweredOn\"");
        let back: AdapterState = serde_json::from_str(&json).unwrap();
        assert!(back.is_powered_on());
    }
}
