//! Adapter State Tracker
//!
//! Brings the radio adapter up and follows its power state afterwards.

use crate::domain::models::AdapterState;
use crate::domain::state::StateStore;
use crate::error::InitializationError;
use crate::infrastructure::bluetooth::radio::RadioStack;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

type StateListener = Arc<dyn Fn(AdapterState) + Send + Sync>;

pub struct AdapterStateTracker {
    radio: Arc<dyn RadioStack>,
    store: Arc<StateStore>,
    listeners: Mutex<Vec<StateListener>>,
}

impl AdapterStateTracker {
    pub fn new(radio: Arc<dyn RadioStack>, store: Arc<StateStore>) -> Self {
        Self {
            radio,
            store,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Run the bring-up sequence and report the final adapter state.
    ///
    /// `initializing` is set for the whole sequence; `initialized` only when
    /// the adapter ends up powered on. Every state observed along the way is
    /// recorded, so on failure the store holds the last one actually seen.
    pub async fn initialize(&self) -> Result<AdapterState, InitializationError> {
        self.store.update(|s| {
            s.initializing = true;
            s.initialized = false;
        });

        let result = self.bring_up().await;
        let initialized = result.is_ok();

        self.store.update(|s| {
            s.initializing = false;
            s.initialized = initialized;
        });
        result
    }

    async fn bring_up(&self) -> Result<AdapterState, InitializationError> {
        let initial = self
            .radio
            .check_state()
            .await
            .map_err(InitializationError::StateQuery)?;
        self.record(initial);
        debug!("Initial adapter state: {}", initial);

        self.radio
            .start()
            .await
            .map_err(InitializationError::Start)?;

        if !initial.is_powered_on() {
            info!("Adapter is {}, requesting power on", initial);
            self.radio
                .enable_radio()
                .await
                .map_err(InitializationError::Enable)?;
        }

        let current = self
            .radio
            .check_state()
            .await
            .map_err(InitializationError::StateQuery)?;
        self.record(current);

        if !current.is_powered_on() {
            return Err(InitializationError::NotPoweredOn(current));
        }
        info!("Adapter initialized, state: {}", current);
        Ok(current)
    }

    pub fn current_state(&self) -> AdapterState {
        self.store.adapter_state()
    }

    pub fn is_initialized(&self) -> bool {
        self.store.read(|s| s.initialized)
    }

    pub fn on_state_changed<F>(&self, listener: F)
    where
        F: Fn(AdapterState) + Send + Sync + 'static,
    {
        self.lock_listeners().push(Arc::new(listener));
    }

    /// Store a newly observed state. Listeners run only on an actual change.
    pub fn record(&self, state: AdapterState) -> bool {
        let previous = self
            .store
            .update(|s| std::mem::replace(&mut s.adapter_state, state));
        if previous == state {
            return false;
        }

        info!("Adapter state changed: {} -> {}", previous, state);
        let listeners: Vec<StateListener> = self.lock_listeners().clone();
        for listener in listeners {
            listener(state);
        }
        true
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<StateListener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::infrastructure::bluetooth::simulated::{RadioCall, SimulatedRadio};

    fn tracker(radio: &Arc<SimulatedRadio>) -> (AdapterStateTracker, Arc<StateStore>) {
        let store = Arc::new(StateStore::new());
        (AdapterStateTracker::new(radio.clone(), store.clone()), store)
    }

    #[tokio::test]
    async fn test_off_then_on_reaches_powered_on() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.script_states([AdapterState::PoweredOff, AdapterState::PoweredOn]);
        let (tracker, store) = tracker(&radio);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        tracker.on_state_changed(move |state| s.lock().unwrap().push(state));

        assert_eq!(tracker.current_state(), AdapterState::Unknown);
        let state = tracker.initialize().await.unwrap();

        assert_eq!(state, AdapterState::PoweredOn);
        assert_eq!(tracker.current_state(), AdapterState::PoweredOn);
        assert!(tracker.is_initialized());
        assert!(!store.snapshot().initializing);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![AdapterState::PoweredOff, AdapterState::PoweredOn]
        );
        assert!(radio.calls().contains(&RadioCall::EnableRadio));
    }

    #[tokio::test]
    async fn test_already_on_skips_enable() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.script_states([AdapterState::PoweredOn, AdapterState::PoweredOn]);
        let (tracker, _) = tracker(&radio);

        tracker.initialize().await.unwrap();

        assert_eq!(
            radio.calls(),
            vec![RadioCall::CheckState, RadioCall::Start, RadioCall::CheckState]
        );
    }

    #[tokio::test]
    async fn test_enable_failure_keeps_last_seen_state() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.script_states([AdapterState::PoweredOff]);
        radio.fail_next(RadioCall::EnableRadio, RadioError::Rejected("user declined".into()));
        let (tracker, store) = tracker(&radio);

        let err = tracker.initialize().await.unwrap_err();

        assert!(matches!(err, InitializationError::Enable(_)));
        assert_eq!(tracker.current_state(), AdapterState::PoweredOff);
        assert!(!tracker.is_initialized());
        assert!(!store.snapshot().initializing);
    }

    #[tokio::test]
    async fn test_not_powered_on_is_not_initialized() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.script_states([AdapterState::PoweredOff, AdapterState::Unauthorized]);
        let (tracker, _) = tracker(&radio);

        let err = tracker.initialize().await.unwrap_err();

        assert_eq!(err, InitializationError::NotPoweredOn(AdapterState::Unauthorized));
        assert!(!tracker.is_initialized());
    }

    #[test]
    fn test_record_ignores_repeats() {
        let radio = Arc::new(SimulatedRadio::new());
        let (tracker, _) = tracker(&radio);
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        tracker.on_state_changed(move |_| *c.lock().unwrap() += 1);

        assert!(tracker.record(AdapterState::Resetting));
        assert!(!tracker.record(AdapterState::Resetting));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
