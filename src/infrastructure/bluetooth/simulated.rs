//! Simulated Radio Stack
//!
//! In-process stand-in for a platform radio. It answers every request from a
//! small in-memory model, publishes the notifications a real stack would, and
//! logs each call so behaviour can be asserted. Failures and latency can be
//! injected per call.

use crate::domain::models::{
    AdapterState, Authorization, Capability, PeripheralDescriptor, ScanRequest,
};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::event_bus::{EventBus, RadioEvent};
use crate::infrastructure::bluetooth::radio::{PermissionProvider, RadioResult, RadioStack};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// One request received by the simulated stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    CheckState,
    Start,
    EnableRadio,
    RequestAuthorization,
    Scan,
    StopScan,
    ListBonded,
    ListConnected,
    ListDiscovered,
    Bond(String),
    Connect(String),
    Disconnect(String, bool),
}

struct SimState {
    adapter: AdapterState,
    scripted_states: VecDeque<AdapterState>,
    in_range: Vec<PeripheralDescriptor>,
    discovered: Vec<PeripheralDescriptor>,
    bonded: Vec<PeripheralDescriptor>,
    connected: Vec<PeripheralDescriptor>,
    authorizations: HashMap<Capability, Authorization>,
    failures: Vec<(RadioCall, RadioError)>,
    calls: Vec<RadioCall>,
    latency: Duration,
    scan_generation: u64,
    scanning: bool,
    last_request: Option<ScanRequest>,
}

pub struct SimulatedRadio {
    bus: EventBus,
    state: Arc<Mutex<SimState>>,
    auto_scan: bool,
    advertisement_interval: Duration,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            state: Arc::new(Mutex::new(SimState {
                adapter: AdapterState::PoweredOff,
                scripted_states: VecDeque::new(),
                in_range: Vec::new(),
                discovered: Vec::new(),
                bonded: Vec::new(),
                connected: Vec::new(),
                authorizations: HashMap::new(),
                failures: Vec::new(),
                calls: Vec::new(),
                latency: Duration::ZERO,
                scan_generation: 0,
                scanning: false,
                last_request: None,
            })),
            auto_scan: false,
            advertisement_interval: Duration::from_millis(250),
        }
    }

    /// Replay in-range advertisements and stop on its own after the
    /// requested duration, like a real stack.
    pub fn with_auto_scan(mut self, advertisement_interval: Duration) -> Self {
        self.auto_scan = true;
        self.advertisement_interval = advertisement_interval;
        self
    }

    pub fn with_peripherals(self, peripherals: Vec<PeripheralDescriptor>) -> Self {
        self.lock().in_range = peripherals;
        self
    }

    pub fn set_adapter_state(&self, state: AdapterState) {
        self.lock().adapter = state;
    }

    /// Answers for the next `check_state` calls, in order.
    pub fn script_states(&self, states: impl IntoIterator<Item = AdapterState>) {
        self.lock().scripted_states.extend(states);
    }

    pub fn set_bonded(&self, list: Vec<PeripheralDescriptor>) {
        self.lock().bonded = list;
    }

    pub fn set_connected(&self, list: Vec<PeripheralDescriptor>) {
        self.lock().connected = list;
    }

    pub fn set_discovered(&self, list: Vec<PeripheralDescriptor>) {
        self.lock().discovered = list;
    }

    pub fn set_authorization(&self, capability: Capability, answer: Authorization) {
        self.lock().authorizations.insert(capability, answer);
    }

    /// Make the next matching call fail with `error`.
    pub fn fail_next(&self, call: RadioCall, error: RadioError) {
        self.lock().failures.push((call, error));
    }

    /// Delay applied to bond, connect and disconnect.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    pub fn last_scan_request(&self) -> Option<ScanRequest> {
        self.lock().last_request.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Report an advertisement as if it was just received over the air.
    pub fn advertise(&self, descriptor: PeripheralDescriptor) {
        record_advertisement(&self.state, &descriptor);
        self.bus.publish(&RadioEvent::PeripheralDiscovered(descriptor));
    }

    /// End the current scan as if its duration elapsed.
    pub fn finish_scan(&self) {
        self.lock().scanning = false;
        self.bus.publish(&RadioEvent::ScanStopped);
    }

    /// Change adapter state from outside, e.g. the user toggling the radio.
    pub fn emit_state(&self, state: AdapterState) {
        self.lock().adapter = state;
        self.bus.publish(&RadioEvent::AdapterStateChanged(state));
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, call: RadioCall) -> RadioResult<()> {
        let mut state = self.lock();
        state.calls.push(call.clone());
        match state.failures.iter().position(|(c, _)| *c == call) {
            Some(index) => Err(state.failures.remove(index).1),
            None => Ok(()),
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn spawn_scan(&self, generation: u64, duration: Duration) {
        let bus = self.bus.clone();
        let state = self.state.clone();
        let interval = self.advertisement_interval;
        let in_range = self.lock().in_range.clone();

        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            for descriptor in in_range {
                tokio::time::sleep(interval).await;
                if !scan_is_current(&state, generation) {
                    return;
                }
                record_advertisement(&state, &descriptor);
                bus.publish(&RadioEvent::PeripheralDiscovered(descriptor));
            }

            tokio::time::sleep_until(started + duration).await;
            if !scan_is_current(&state, generation) {
                return;
            }
            if let Ok(mut s) = state.lock() {
                s.scanning = false;
            }
            debug!("Simulated scan {} timed out", generation);
            bus.publish(&RadioEvent::ScanStopped);
        });
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

fn scan_is_current(state: &Mutex<SimState>, generation: u64) -> bool {
    state
        .lock()
        .map(|s| s.scanning && s.scan_generation == generation)
        .unwrap_or(false)
}

fn record_advertisement(state: &Mutex<SimState>, descriptor: &PeripheralDescriptor) {
    let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
    if !s.discovered.iter().any(|d| d.id == descriptor.id) {
        s.discovered.push(descriptor.clone());
    }
}

fn lookup(state: &SimState, id: &str) -> PeripheralDescriptor {
    state
        .in_range
        .iter()
        .chain(state.discovered.iter())
        .chain(state.bonded.iter())
        .find(|d| d.id == id)
        .cloned()
        .unwrap_or_else(|| PeripheralDescriptor::new(id))
}

#[async_trait]
impl RadioStack for SimulatedRadio {
    fn events(&self) -> EventBus {
        self.bus.clone()
    }

    async fn check_state(&self) -> RadioResult<AdapterState> {
        self.enter(RadioCall::CheckState)?;
        let mut state = self.lock();
        if let Some(next) = state.scripted_states.pop_front() {
            state.adapter = next;
        }
        Ok(state.adapter)
    }

    async fn start(&self) -> RadioResult<()> {
        self.enter(RadioCall::Start)
    }

    async fn enable_radio(&self) -> RadioResult<()> {
        self.enter(RadioCall::EnableRadio)?;
        let changed = {
            let mut state = self.lock();
            // Scripted answers describe the outcome themselves.
            if state.scripted_states.is_empty() && state.adapter != AdapterState::PoweredOn {
                state.adapter = AdapterState::PoweredOn;
                true
            } else {
                false
            }
        };
        if changed {
            self.bus
                .publish(&RadioEvent::AdapterStateChanged(AdapterState::PoweredOn));
        }
        Ok(())
    }

    async fn scan(&self, request: &ScanRequest) -> RadioResult<()> {
        self.enter(RadioCall::Scan)?;
        let generation = {
            let mut state = self.lock();
            if state.adapter != AdapterState::PoweredOn {
                return Err(RadioError::Rejected(format!(
                    "adapter is {}",
                    state.adapter
                )));
            }
            state.scan_generation += 1;
            state.scanning = true;
            state.discovered.clear();
            state.last_request = Some(request.clone());
            state.scan_generation
        };
        info!(
            "Simulated scan {} started for {}s",
            generation, request.duration_secs
        );

        if self.auto_scan {
            self.spawn_scan(generation, Duration::from_secs(request.duration_secs.into()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        self.enter(RadioCall::StopScan)?;
        let was_scanning = std::mem::replace(&mut self.lock().scanning, false);
        if was_scanning {
            self.bus.publish(&RadioEvent::ScanStopped);
        }
        Ok(())
    }

    async fn list_bonded(&self) -> RadioResult<Vec<PeripheralDescriptor>> {
        self.enter(RadioCall::ListBonded)?;
        Ok(self.lock().bonded.clone())
    }

    async fn list_connected(&self) -> RadioResult<Vec<PeripheralDescriptor>> {
        self.enter(RadioCall::ListConnected)?;
        Ok(self.lock().connected.clone())
    }

    async fn list_discovered(&self) -> RadioResult<Vec<PeripheralDescriptor>> {
        self.enter(RadioCall::ListDiscovered)?;
        Ok(self.lock().discovered.clone())
    }

    async fn bond(&self, id: &str) -> RadioResult<()> {
        self.enter(RadioCall::Bond(id.to_string()))?;
        self.simulate_latency().await;
        {
            let mut state = self.lock();
            if !state.bonded.iter().any(|d| d.id == id) {
                let descriptor = lookup(&state, id);
                state.bonded.push(descriptor);
            }
        }
        self.bus
            .publish(&RadioEvent::PeripheralBonded { id: id.to_string() });
        Ok(())
    }

    async fn connect(&self, id: &str) -> RadioResult<()> {
        self.enter(RadioCall::Connect(id.to_string()))?;
        self.simulate_latency().await;
        {
            let mut state = self.lock();
            if !state.connected.iter().any(|d| d.id == id) {
                let descriptor = lookup(&state, id);
                state.connected.push(descriptor);
            }
        }
        self.bus
            .publish(&RadioEvent::PeripheralConnected { id: id.to_string() });
        Ok(())
    }

    async fn disconnect(&self, id: &str, force: bool) -> RadioResult<()> {
        self.enter(RadioCall::Disconnect(id.to_string(), force))?;
        self.simulate_latency().await;
        let was_connected = {
            let mut state = self.lock();
            let before = state.connected.len();
            state.connected.retain(|d| d.id != id);
            before != state.connected.len()
        };
        if was_connected {
            self.bus
                .publish(&RadioEvent::PeripheralDisconnected { id: id.to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionProvider for SimulatedRadio {
    async fn request_authorization(
        &self,
        capabilities: &[Capability],
    ) -> RadioResult<HashMap<Capability, Authorization>> {
        self.enter(RadioCall::RequestAuthorization)?;
        let state = self.lock();
        Ok(capabilities
            .iter()
            .map(|c| {
                let answer = state
                    .authorizations
                    .get(c)
                    .copied()
                    .unwrap_or(Authorization::Granted);
                (*c, answer)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::event_bus::EventKind;

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let radio = SimulatedRadio::new();
        radio.fail_next(RadioCall::Start, RadioError::Unavailable);

        assert_eq!(radio.start().await, Err(RadioError::Unavailable));
        assert_eq!(radio.start().await, Ok(()));
        assert_eq!(radio.calls(), vec![RadioCall::Start, RadioCall::Start]);
    }

    #[tokio::test]
    async fn test_scan_requires_power() {
        let radio = SimulatedRadio::new();
        assert!(radio.scan(&ScanRequest::default()).await.is_err());

        radio.set_adapter_state(AdapterState::PoweredOn);
        assert!(radio.scan(&ScanRequest::default()).await.is_ok());
        assert!(radio.is_scanning());
    }

    #[tokio::test]
    async fn test_connect_publishes_event() {
        let radio = SimulatedRadio::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        radio
            .events()
            .subscribe(EventKind::PeripheralConnected, move |e| s.lock().unwrap().push(e.clone()));

        radio.connect("A").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![RadioEvent::PeripheralConnected { id: "A".into() }]
        );
        assert_eq!(radio.list_connected().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_scan_replays_and_stops() {
        let radio = SimulatedRadio::new()
            .with_auto_scan(Duration::from_millis(100))
            .with_peripherals(vec![
                PeripheralDescriptor::connectable("A"),
                PeripheralDescriptor::new("B"),
            ]);
        radio.set_adapter_state(AdapterState::PoweredOn);

        let stopped = Arc::new(Mutex::new(false));
        let s = stopped.clone();
        radio
            .events()
            .subscribe(EventKind::ScanStopped, move |_| *s.lock().unwrap() = true);

        let request = ScanRequest {
            duration_secs: 2,
            ..ScanRequest::default()
        };
        radio.scan(&request).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(*stopped.lock().unwrap());
        assert!(!radio.is_scanning());
        assert_eq!(radio.list_discovered().await.unwrap().len(), 2);
    }
}
