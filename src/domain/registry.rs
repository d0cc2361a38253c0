//! Device Registry
//!
//! Holds the three device sets shown to the user: peripherals discovered in
//! the current scan, peripherals bonded with the adapter, and peripherals
//! currently connected. All three are keyed by peripheral id.

use crate::domain::models::PeripheralDescriptor;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    discovered: Vec<PeripheralDescriptor>,
    discovered_ids: HashSet<String>,
    bonded: Vec<PeripheralDescriptor>,
    connected: Vec<PeripheralDescriptor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement. Returns `true` if the device was added.
    ///
    /// Non-connectable advertisers are dropped, and the first descriptor seen
    /// for an id wins: later advertisements neither overwrite nor reorder it.
    pub fn add_discovered(&mut self, descriptor: PeripheralDescriptor) -> bool {
        if !descriptor.is_connectable() {
            return false;
        }
        if !self.discovered_ids.insert(descriptor.id.clone()) {
            return false;
        }
        self.discovered.push(descriptor);
        true
    }

    /// Authoritative resync with the radio stack's own discovered list.
    pub fn replace_discovered(&mut self, list: Vec<PeripheralDescriptor>) {
        self.discovered.clear();
        self.discovered_ids.clear();
        for descriptor in list {
            self.add_discovered(descriptor);
        }
    }

    pub fn snapshot_bonded(&mut self, list: Vec<PeripheralDescriptor>) {
        self.bonded = dedup_by_id(list);
    }

    pub fn snapshot_connected(&mut self, list: Vec<PeripheralDescriptor>) {
        self.connected = dedup_by_id(list);
    }

    /// Add `id` to the connected set. Returns `false` if it was already there.
    pub fn mark_connected(&mut self, id: &str) -> bool {
        if self.is_connected(id) {
            return false;
        }
        let descriptor = self
            .find_known(id)
            .cloned()
            .unwrap_or_else(|| PeripheralDescriptor::new(id));
        self.connected.push(descriptor);
        true
    }

    /// Remove `id` from the connected set. Returns `false` if it was absent.
    pub fn mark_disconnected(&mut self, id: &str) -> bool {
        let before = self.connected.len();
        self.connected.retain(|d| d.id != id);
        self.connected.len() != before
    }

    pub fn clear_all(&mut self) {
        self.discovered.clear();
        self.discovered_ids.clear();
        self.bonded.clear();
        self.connected.clear();
    }

    pub fn discovered(&self) -> &[PeripheralDescriptor] {
        &self.discovered
    }

    pub fn bonded(&self) -> &[PeripheralDescriptor] {
        &self.bonded
    }

    pub fn connected(&self) -> &[PeripheralDescriptor] {
        &self.connected
    }

    pub fn is_discovered(&self, id: &str) -> bool {
        self.discovered_ids.contains(id)
    }

    pub fn is_bonded(&self, id: &str) -> bool {
        self.bonded.iter().any(|d| d.id == id)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connected.iter().any(|d| d.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty() && self.bonded.is_empty() && self.connected.is_empty()
    }

    fn find_known(&self, id: &str) -> Option<&PeripheralDescriptor> {
        self.discovered
            .iter()
            .chain(self.bonded.iter())
            .find(|d| d.id == id)
    }
}

fn dedup_by_id(list: Vec<PeripheralDescriptor>) -> Vec<PeripheralDescriptor> {
    let mut seen = HashSet::new();
    list.into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect()
}
