//! Coordinator Service Module
//!
//! Composition root that ties the adapter tracker, scan session and
//! connection controller to the radio stack's notifications, and exposes the
//! command surface used by the presentation layer.

use crate::domain::models::{
    AdapterState, AppEvent, CoordinatorSnapshot, MessageSeverity, ScanRequest, StatusMessage,
};
use crate::domain::settings::Settings;
use crate::domain::state::StateStore;
use crate::error::{ConnectionError, DisconnectionError, ScanError};
use crate::infrastructure::bluetooth::{
    adapter::AdapterStateTracker,
    connection::ConnectionController,
    event_bus::{EventKind, RadioEvent, SubscriptionGroup},
    radio::{PermissionProvider, RadioStack},
    scanner::{ScanSession, ScanStarted},
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Live event wiring: the bus subscriptions and the task draining them.
struct Wiring {
    subscriptions: SubscriptionGroup,
    event_loop: JoinHandle<()>,
}

/// Peripheral discovery and connection coordinator.
pub struct Coordinator {
    radio: Arc<dyn RadioStack>,
    store: Arc<StateStore>,
    tracker: Arc<AdapterStateTracker>,
    scanner: ScanSession,
    connections: ConnectionController,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    scan_request: ScanRequest,
    wiring: Mutex<Option<Wiring>>,
}

impl Coordinator {
    pub fn new(
        radio: Arc<dyn RadioStack>,
        permissions: Arc<dyn PermissionProvider>,
        settings: &Settings,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let store = Arc::new(StateStore::new());
        let tracker = Arc::new(AdapterStateTracker::new(radio.clone(), store.clone()));
        let scanner = ScanSession::new(
            radio.clone(),
            permissions,
            store.clone(),
            event_sender.clone(),
        )
        .with_watchdog(Duration::from_millis(settings.scan.watchdog_grace_ms));
        let connections = ConnectionController::new(
            radio.clone(),
            store.clone(),
            event_sender.clone(),
            settings.connection.clone().into(),
        );

        Self {
            radio,
            store,
            tracker,
            scanner,
            connections,
            event_sender,
            scan_request: settings.scan.request(),
            wiring: Mutex::new(None),
        }
    }

    /// Wire notifications, then bring the adapter up.
    ///
    /// Returns whether initialization succeeded. Failures never propagate;
    /// the wiring stays in place either way so `shutdown` always has
    /// something consistent to tear down.
    pub async fn start(&self) -> bool {
        self.wire();
        self.initialize().await
    }

    /// Subscribe one handler per event kind. Calling this twice is a no-op.
    pub fn wire(&self) {
        let mut wiring = self.lock_wiring();
        if wiring.is_some() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscriptions = SubscriptionGroup::new(self.radio.events());
        for kind in EventKind::ALL {
            let tx = tx.clone();
            let store = self.store.clone();
            subscriptions.subscribe(kind, move |event| {
                // A stop notification belongs to the session running when it
                // was raised, not the one running when it is handled.
                let session = match event {
                    RadioEvent::ScanStopped => store.read(|s| s.scan.session()),
                    _ => None,
                };
                let _ = tx.send((event.clone(), session));
            });
        }

        let router = EventRouter {
            store: self.store.clone(),
            tracker: self.tracker.clone(),
            scanner: self.scanner.clone(),
            connections: self.connections.clone(),
        };
        let event_loop = tokio::spawn(router.run(rx));

        info!("Wired {} radio event subscriptions", subscriptions.len());
        *wiring = Some(Wiring {
            subscriptions,
            event_loop,
        });
    }

    pub fn is_wired(&self) -> bool {
        self.lock_wiring().is_some()
    }

    pub async fn initialize(&self) -> bool {
        match self.tracker.initialize().await {
            Ok(state) => {
                self.send_log(
                    &format!("Module initialized with state {}", state),
                    MessageSeverity::Success,
                );
                true
            }
            Err(e) => {
                warn!("Radio initialization failed: {}", e);
                self.send_log("Module not initialized", MessageSeverity::Warning);
                false
            }
        }
    }

    /// Scan with the configured defaults.
    pub async fn start_scan(&self) -> Result<ScanStarted, ScanError> {
        self.scanner.start(&self.scan_request).await
    }

    pub async fn start_scan_with(&self, request: &ScanRequest) -> Result<ScanStarted, ScanError> {
        self.scanner.start(request).await
    }

    pub async fn stop_scan(&self) -> bool {
        self.scanner.stop().await
    }

    pub async fn connect(&self, id: &str) -> Result<(), ConnectionError> {
        self.connections.connect(id).await
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), DisconnectionError> {
        self.connections.disconnect(id).await
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.tracker.current_state()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.store.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.store.subscribe()
    }

    /// Release every subscription and wait for queued events to drain.
    pub async fn shutdown(&self) {
        let wiring = self.lock_wiring().take();
        self.scanner.disarm_watchdog();
        let Some(Wiring {
            mut subscriptions,
            event_loop,
        }) = wiring
        else {
            return;
        };

        subscriptions.teardown();
        // Handlers owned the only senders, so the loop ends once drained.
        if let Err(e) = event_loop.await {
            if !e.is_cancelled() {
                warn!("Event loop ended abnormally: {}", e);
            }
        }
        info!("Coordinator shut down");
    }

    fn lock_wiring(&self) -> std::sync::MutexGuard<'_, Option<Wiring>> {
        self.wiring.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.scanner.disarm_watchdog();
        if let Some(mut wiring) = self.lock_wiring().take() {
            wiring.subscriptions.teardown();
            wiring.event_loop.abort();
        }
    }
}

/// Applies radio events to coordinator state, one at a time.
struct EventRouter {
    store: Arc<StateStore>,
    tracker: Arc<AdapterStateTracker>,
    scanner: ScanSession,
    connections: ConnectionController,
}

impl EventRouter {
    async fn run(self, mut events: mpsc::UnboundedReceiver<(RadioEvent, Option<u64>)>) {
        while let Some((event, session)) = events.recv().await {
            self.dispatch(event, session).await;
        }
        debug!("Radio event loop finished");
    }

    async fn dispatch(&self, event: RadioEvent, session: Option<u64>) {
        match event {
            RadioEvent::AdapterStateChanged(state) => {
                self.tracker.record(state);
            }
            RadioEvent::PeripheralDiscovered(descriptor) => {
                let id = descriptor.id.clone();
                // Advertisements outside a scan window are stale.
                let added = self
                    .store
                    .update(|s| s.scan.is_active() && s.registry.add_discovered(descriptor));
                if added {
                    debug!("Discovered peripheral {}", id);
                }
            }
            RadioEvent::ScanStopped => {
                self.scanner.on_scan_stopped(session).await;
            }
            RadioEvent::PeripheralConnected { id } => self.connections.on_connected(&id),
            RadioEvent::PeripheralDisconnected { id } => self.connections.on_disconnected(&id),
            RadioEvent::PeripheralBonded { id } => self.connections.on_bonded(&id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MatchMode, PeripheralDescriptor};
    use crate::error::RadioError;
    use crate::infrastructure::bluetooth::radio::RadioStack;
    use crate::infrastructure::bluetooth::simulated::{RadioCall, SimulatedRadio};

    struct Fixture {
        radio: Arc<SimulatedRadio>,
        coordinator: Coordinator,
        updates: watch::Receiver<CoordinatorSnapshot>,
        _events: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn fixture(settings: Settings) -> Fixture {
        let radio = Arc::new(SimulatedRadio::new());
        let (tx, events) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(radio.clone(), radio.clone(), &settings, tx);
        let updates = coordinator.watch();
        Fixture {
            radio,
            coordinator,
            updates,
            _events: events,
        }
    }

    async fn wait_until(
        updates: &mut watch::Receiver<CoordinatorSnapshot>,
        predicate: impl FnMut(&CoordinatorSnapshot) -> bool,
    ) -> CoordinatorSnapshot {
        let snapshot = tokio::time::timeout(Duration::from_secs(2), updates.wait_for(predicate))
            .await
            .expect("timed out waiting for coordinator state")
            .expect("state store dropped");
        (*snapshot).clone()
    }

    fn ids(list: &[PeripheralDescriptor]) -> Vec<&str> {
        list.iter().map(|d| d.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_scan_connect_disconnect_flow() {
        let mut f = fixture(Settings::default());
        assert!(f.coordinator.start().await);
        assert_eq!(f.coordinator.adapter_state(), AdapterState::PoweredOn);

        f.coordinator.start_scan().await.unwrap();
        f.radio.advertise(PeripheralDescriptor::connectable("D1"));
        f.radio.advertise(PeripheralDescriptor::connectable("D1").with_local_name("X"));
        f.radio.advertise(PeripheralDescriptor::new("beacon"));
        f.radio.advertise(PeripheralDescriptor::connectable("D2"));

        let snapshot = wait_until(&mut f.updates, |s| s.discovered.len() == 2).await;
        assert_eq!(ids(&snapshot.discovered), vec!["D1", "D2"]);
        assert_eq!(snapshot.discovered[0].display_name(), None);

        f.radio.finish_scan();
        let snapshot = wait_until(&mut f.updates, |s| !s.scanning).await;
        // Resynced from the radio's own list, still filtered.
        assert_eq!(ids(&snapshot.discovered), vec!["D1", "D2"]);

        f.coordinator.connect("D1").await.unwrap();
        let snapshot = wait_until(&mut f.updates, |s| !s.connected.is_empty()).await;
        assert_eq!(ids(&snapshot.connected), vec!["D1"]);

        f.coordinator.disconnect("D1").await.unwrap();
        wait_until(&mut f.updates, |s| s.connected.is_empty()).await;

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_rescan_clears_previous_session_first() {
        let mut f = fixture(Settings::default());
        f.coordinator.start().await;

        f.coordinator.start_scan().await.unwrap();
        f.radio.advertise(PeripheralDescriptor::connectable("A"));
        f.radio.advertise(PeripheralDescriptor::connectable("B"));
        f.radio.finish_scan();
        let snapshot = wait_until(&mut f.updates, |s| !s.scanning).await;
        assert_eq!(ids(&snapshot.discovered), vec!["A", "B"]);
        assert!(snapshot.bonded.is_empty() && snapshot.connected.is_empty());

        f.radio.set_bonded(vec![PeripheralDescriptor::new("K")]);
        f.coordinator.start_scan().await.unwrap();

        let snapshot = f.coordinator.snapshot();
        assert!(snapshot.scanning);
        assert!(snapshot.discovered.is_empty());
        assert_eq!(ids(&snapshot.bonded), vec!["K"]);
        assert!(snapshot.connected.is_empty());

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_report_does_not_end_next_scan() {
        let f = fixture(Settings::default());
        f.coordinator.start().await;

        let first = f.coordinator.start_scan().await.unwrap();
        // The radio raises its own stop report while the first scan is active.
        assert!(f.coordinator.stop_scan().await);
        let second = f.coordinator.start_scan().await.unwrap();
        assert_ne!(first.session, second.session);
        f.radio.advertise(PeripheralDescriptor::connectable("N"));

        // Shutdown waits for every queued notification to be handled.
        f.coordinator.shutdown().await;

        let snapshot = f.coordinator.snapshot();
        assert!(snapshot.scanning);
        assert_eq!(ids(&snapshot.discovered), vec!["N"]);
    }

    #[tokio::test]
    async fn test_configured_scan_parameters_reach_radio() {
        let mut settings = Settings::default();
        settings.scan.service_uuids = vec!["180d".into(), "180f".into()];
        settings.scan.duration_secs = 12;
        settings.scan.allow_duplicates = true;
        settings.scan.match_mode = MatchMode::Sticky;
        let f = fixture(settings);
        f.coordinator.start().await;

        f.coordinator.start_scan().await.unwrap();

        assert_eq!(
            f.radio.last_scan_request(),
            Some(ScanRequest {
                filters: vec!["180d".into(), "180f".into()],
                duration_secs: 12,
                allow_duplicates: true,
                match_mode: MatchMode::Sticky,
            })
        );
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_scan_parameters() {
        let f = fixture(Settings::default());
        f.coordinator.start().await;

        f.coordinator.start_scan().await.unwrap();

        let request = f.radio.last_scan_request().unwrap();
        assert!(request.filters.is_empty());
        assert_eq!(request.duration_secs, 30);
        assert!(!request.allow_duplicates);
        assert_eq!(request.match_mode, MatchMode::Aggressive);
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_while_scanning_rejected() {
        let f = fixture(Settings::default());
        f.coordinator.start().await;

        f.coordinator.start_scan().await.unwrap();
        assert_eq!(
            f.coordinator.start_scan().await.unwrap_err(),
            ScanError::AlreadyScanning
        );

        assert!(f.coordinator.stop_scan().await);
        assert!(!f.coordinator.snapshot().scanning);
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_bond_failure_never_connects() {
        let mut settings = Settings::default();
        settings.connection.require_bonding = true;
        let f = fixture(settings);
        f.coordinator.start().await;
        f.radio.fail_next(RadioCall::Bond("D1".into()), RadioError::Rejected("refused".into()));

        let err = f.coordinator.connect("D1").await.unwrap_err();

        assert!(matches!(err, ConnectionError::Bond(_)));
        assert!(!f.radio.calls().contains(&RadioCall::Connect("D1".into())));
        assert!(f.coordinator.snapshot().connected.is_empty());
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialization_failure_is_absorbed() {
        let f = fixture(Settings::default());
        f.radio.fail_next(RadioCall::Start, RadioError::Unavailable);

        assert!(!f.coordinator.start().await);

        let snapshot = f.coordinator.snapshot();
        assert!(!snapshot.initialized);
        assert!(!snapshot.initializing);
        assert_eq!(snapshot.adapter_state, AdapterState::PoweredOff);
        assert!(f.coordinator.is_wired());

        f.coordinator.shutdown().await;
        assert_eq!(f.radio.events().total_handlers(), 0);
    }

    #[tokio::test]
    async fn test_adapter_events_reach_tracker() {
        let mut f = fixture(Settings::default());
        f.coordinator.start().await;

        f.radio.emit_state(AdapterState::Resetting);
        wait_until(&mut f.updates, |s| s.adapter_state == AdapterState::Resetting).await;

        assert_eq!(
            f.coordinator.connect("D1").await,
            Err(ConnectionError::AdapterNotReady(AdapterState::Resetting))
        );
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_all_subscriptions() {
        let f = fixture(Settings::default());
        f.coordinator.start().await;
        let bus = f.radio.events();
        for kind in EventKind::ALL {
            assert_eq!(bus.handler_count(kind), 1);
        }

        f.coordinator.shutdown().await;
        assert_eq!(bus.total_handlers(), 0);
        assert!(!f.coordinator.is_wired());

        // Notifications after teardown go nowhere.
        f.radio.emit_state(AdapterState::PoweredOff);
        assert_eq!(f.coordinator.adapter_state(), AdapterState::PoweredOn);

        // Idempotent.
        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let f = fixture(Settings::default());
        f.coordinator.wire();
        f.coordinator.wire();
        let bus = f.radio.events();
        assert_eq!(bus.total_handlers(), 6);

        drop(f.coordinator);
        assert_eq!(bus.total_handlers(), 0);
    }

    #[tokio::test]
    async fn test_advertisement_outside_scan_ignored() {
        let f = fixture(Settings::default());
        f.coordinator.start().await;

        f.radio.advertise(PeripheralDescriptor::connectable("late"));
        f.coordinator.shutdown().await;

        assert!(f.coordinator.snapshot().discovered.is_empty());
    }
}
