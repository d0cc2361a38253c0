//! Scan Session
//!
//! Runs one bounded discovery window at a time: clears the registry, asks for
//! permissions, snapshots bonded/connected devices, then starts the radio
//! scan. When the window ends the discovered list is resynced from the
//! radio stack.

use crate::domain::models::{AppEvent, Capability, MessageSeverity, ScanRequest, StatusMessage};
use crate::domain::state::{ScanPhase, StateStore};
use crate::error::{PermissionWarning, ScanError};
use crate::infrastructure::bluetooth::radio::{denied_capabilities, PermissionProvider, RadioStack};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a successful scan start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStarted {
    pub session: u64,
    /// Set when some capability was denied; the scan was attempted anyway.
    pub permission_warning: Option<PermissionWarning>,
}

#[derive(Clone)]
pub struct ScanSession {
    radio: Arc<dyn RadioStack>,
    permissions: Arc<dyn PermissionProvider>,
    store: Arc<StateStore>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    next_session: Arc<AtomicU64>,
    watchdog_grace: Option<Duration>,
    watchdog: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScanSession {
    pub fn new(
        radio: Arc<dyn RadioStack>,
        permissions: Arc<dyn PermissionProvider>,
        store: Arc<StateStore>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            radio,
            permissions,
            store,
            event_sender,
            next_session: Arc::new(AtomicU64::new(0)),
            watchdog_grace: None,
            watchdog: Arc::new(Mutex::new(None)),
        }
    }

    /// Finalize a session on our own if the radio stack has not reported the
    /// end of the scan `grace` after its deadline.
    pub fn with_watchdog(mut self, grace: Duration) -> Self {
        self.watchdog_grace = Some(grace);
        self
    }

    pub fn is_scanning(&self) -> bool {
        self.store.read(|s| s.scan.is_active())
    }

    /// Start a scan. Rejected with [`ScanError::AlreadyScanning`] while one is
    /// active. Any later failure puts the session back to idle.
    pub async fn start(&self, request: &ScanRequest) -> Result<ScanStarted, ScanError> {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let window = Duration::from_secs(request.duration_secs.into());

        self.store.update(|s| {
            if s.scan.is_active() {
                return Err(ScanError::AlreadyScanning);
            }
            s.registry.clear_all();
            s.scan = ScanPhase::Scanning { session };
            Ok(())
        })?;

        info!(
            "Starting scan {} ({}s, filters: {:?})",
            session, request.duration_secs, request.filters
        );
        self.send_log("Scanning for peripherals...", MessageSeverity::Info);

        match self.begin(session, request).await {
            Ok(permission_warning) => {
                if let Some(grace) = self.watchdog_grace {
                    self.arm_watchdog(session, window + grace);
                }
                Ok(ScanStarted {
                    session,
                    permission_warning,
                })
            }
            Err(e) => {
                warn!("Scan {} failed to start: {}", session, e);
                self.store.update(|s| {
                    if s.scan.session() == Some(session) {
                        s.scan = ScanPhase::Idle;
                    }
                });
                self.send_log(&format!("Scan failed: {}", e), MessageSeverity::Error);
                Err(e)
            }
        }
    }

    async fn begin(
        &self,
        session: u64,
        request: &ScanRequest,
    ) -> Result<Option<PermissionWarning>, ScanError> {
        let answers = self
            .permissions
            .request_authorization(&Capability::SCAN_SET)
            .await
            .map_err(ScanError::Authorization)?;
        let denied = denied_capabilities(&Capability::SCAN_SET, &answers);
        let warning = if denied.is_empty() {
            None
        } else {
            let warning = PermissionWarning { denied };
            warn!("Scanning without full authorization: {}", warning);
            self.send_log("Bluetooth permission needed", MessageSeverity::Warning);
            Some(warning)
        };

        let bonded = self
            .radio
            .list_bonded()
            .await
            .map_err(ScanError::Snapshot)?;
        let connected = self
            .radio
            .list_connected()
            .await
            .map_err(ScanError::Snapshot)?;
        debug!(
            "Snapshot: {} bonded, {} connected",
            bonded.len(),
            connected.len()
        );
        self.store.update(|s| {
            if s.scan.session() == Some(session) {
                s.registry.snapshot_bonded(bonded);
                s.registry.snapshot_connected(connected);
            }
        });

        self.radio
            .scan(request)
            .await
            .map_err(ScanError::Radio)?;
        Ok(warning)
    }

    /// Stop the active scan early. Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let Some(session) = self.current_session() else {
            return false;
        };
        info!("Stopping scan {}", session);
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Radio stack failed to stop scan: {}", e);
        }
        self.finalize(session).await
    }

    /// The radio stack reported the end of its scan window.
    ///
    /// `session` is the session that was active when the report was raised.
    /// Reports for a session that already finished are ignored.
    pub async fn on_scan_stopped(&self, session: Option<u64>) -> bool {
        match session {
            Some(session) => self.finalize(session).await,
            None => {
                debug!("Scan stop reported with no active session");
                false
            }
        }
    }

    pub fn current_session(&self) -> Option<u64> {
        self.store.read(|s| s.scan.session())
    }

    /// Resync the discovered list and return to idle.
    ///
    /// Only the first call for a session does anything. Scanning is cleared
    /// even when the final device query fails.
    pub async fn finalize(&self, session: u64) -> bool {
        if self.store.read(|s| s.scan.session()) != Some(session) {
            return false;
        }

        let discovered = self.radio.list_discovered().await;
        let finished = self.store.update(|s| {
            if s.scan.session() != Some(session) {
                return None;
            }
            match discovered {
                Ok(list) => s.registry.replace_discovered(list),
                Err(e) => warn!("Failed to fetch discovered peripherals: {}", e),
            }
            s.scan = ScanPhase::Idle;
            Some(s.registry.discovered().len())
        });

        let Some(count) = finished else {
            return false;
        };
        self.disarm_watchdog();
        info!("Scan {} finished with {} peripheral(s)", session, count);
        self.send_log(
            &format!("Scan finished: {} device(s) found", count),
            MessageSeverity::Info,
        );
        true
    }

    /// Cancel any pending watchdog, e.g. on shutdown.
    pub fn disarm_watchdog(&self) {
        if let Some(handle) = self.lock_watchdog().take() {
            handle.abort();
        }
    }

    fn arm_watchdog(&self, session: u64, after: Duration) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if this.store.read(|s| s.scan.session()) != Some(session) {
                return;
            }
            warn!("Radio stack never ended scan {}, stopping it", session);
            if let Err(e) = this.radio.stop_scan().await {
                warn!("Radio stack failed to stop scan: {}", e);
            }
            this.finalize(session).await;
        });
        if let Some(previous) = self.lock_watchdog().replace(handle) {
            previous.abort();
        }
    }

    fn lock_watchdog(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watchdog.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
