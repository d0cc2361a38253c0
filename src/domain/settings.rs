use crate::domain::models::{MatchMode, ScanRequest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    /// Level for the radio layer only. Advertisement traffic is noisy at
    /// `debug`, so it can be raised or lowered without touching `level`.
    #[serde(default)]
    pub radio_level: Option<String>,
    /// Extra `target=level` filter directives.
    #[serde(default)]
    pub directives: Vec<String>,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            radio_level: None,
            directives: Vec::new(),
            file_logging_enabled: false,
            console_logging_enabled: true,
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: LogRotation::default(),
            show_file_line: false,
            show_target: true,
            ansi_colors: true,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
// Per-user data dir, or `./logs` when there is none.
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("PeripheralCoordinator").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}
fn default_prefix() -> String {
    "peripheral_coordinator.log".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_scan_duration")]
    pub duration_secs: u32,
    #[serde(default = "default_false")]
    pub allow_duplicates: bool,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub service_uuids: Vec<String>,
    /// Extra time past the scan window before we end it ourselves.
    #[serde(default = "default_watchdog_grace_ms")]
    pub watchdog_grace_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            duration_secs: default_scan_duration(),
            allow_duplicates: false,
            match_mode: MatchMode::default(),
            service_uuids: Vec::new(),
            watchdog_grace_ms: default_watchdog_grace_ms(),
        }
    }
}

impl ScanSettings {
    pub fn request(&self) -> ScanRequest {
        ScanRequest {
            filters: self.service_uuids.clone(),
            duration_secs: self.duration_secs,
            allow_duplicates: self.allow_duplicates,
            match_mode: self.match_mode,
        }
    }
}

fn default_scan_duration() -> u32 {
    30
}
fn default_watchdog_grace_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_require_bonding")]
    pub require_bonding: bool,
    /// `null` disables the timeout.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub force_disconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            require_bonding: default_require_bonding(),
            operation_timeout_ms: default_operation_timeout_ms(),
            force_disconnect: true,
        }
    }
}

// Android only connects to bonded peripherals reliably.
fn default_require_bonding() -> bool {
    cfg!(target_os = "android")
}
fn default_operation_timeout_ms() -> Option<u64> {
    Some(15_000)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from `path`, falling back to defaults when missing or invalid.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PeripheralCoordinator");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
