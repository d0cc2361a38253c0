//! Coordinator State Store
//!
//! Single authoritative copy of the coordinator's mutable state. Every
//! mutation goes through [`StateStore::update`], which publishes a fresh
//! [`CoordinatorSnapshot`] to watchers afterwards.

use crate::domain::models::{AdapterState, CoordinatorSnapshot};
use crate::domain::registry::DeviceRegistry;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    Scanning { session: u64 },
}

impl ScanPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, ScanPhase::Scanning { .. })
    }

    pub fn session(&self) -> Option<u64> {
        match self {
            ScanPhase::Scanning { session } => Some(*session),
            ScanPhase::Idle => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CoreState {
    pub adapter_state: AdapterState,
    pub initialized: bool,
    pub initializing: bool,
    pub scan: ScanPhase,
    pub registry: DeviceRegistry,
}

impl CoreState {
    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            adapter_state: self.adapter_state,
            initialized: self.initialized,
            initializing: self.initializing,
            scanning: self.scan.is_active(),
            discovered: self.registry.discovered().to_vec(),
            bonded: self.registry.bonded().to_vec(),
            connected: self.registry.connected().to_vec(),
        }
    }
}

pub struct StateStore {
    state: Mutex<CoreState>,
    sender: watch::Sender<CoordinatorSnapshot>,
}

impl StateStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(CoordinatorSnapshot::default());
        Self {
            state: Mutex::new(CoreState::default()),
            sender,
        }
    }

    /// Read without publishing. The lock is released before this returns.
    pub fn read<R>(&self, f: impl FnOnce(&CoreState) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the state and publish the resulting snapshot.
    pub fn update<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.lock();
            let result = f(&mut state);
            (result, state.snapshot())
        };
        self.sender.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.sender.subscribe()
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.read(|s| s.adapter_state)
    }

    // A poisoned lock only means a panicking reader; the data is still usable.
    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PeripheralDescriptor;

    #[test]
    fn test_update_publishes_snapshot() {
        let store = StateStore::new();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.update(|s| {
            s.registry
                .add_discovered(PeripheralDescriptor::connectable("A"));
        });

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.discovered.len(), 1);
        assert_eq!(store.snapshot(), snapshot);
    }

    #[test]
    fn test_unchanged_state_does_not_notify() {
        let store = StateStore::new();
        let mut rx = store.subscribe();

        store.update(|_| ());
        assert!(!rx.has_changed().unwrap());

        store.update(|s| s.adapter_state = AdapterState::PoweredOff);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().adapter_state, AdapterState::PoweredOff);
    }

    #[test]
    fn test_scanning_flag_follows_phase() {
        let store = StateStore::new();
        store.update(|s| s.scan = ScanPhase::Scanning { session: 1 });
        assert!(store.snapshot().scanning);

        store.update(|s| s.scan = ScanPhase::Idle);
        assert!(!store.snapshot().scanning);
    }
}
