//! Persisted machine state.
//!
//! Everything is keyed by name (device tag, block name, bank name, space
//! name) so a snapshot does not depend on declaration order.

use std::collections::BTreeMap;

use crate::device::{fnv1a, DeviceEvent, DeviceState, StateValue, FNV_OFFSET};
use crate::machine::Bookkeeping;

/// Snapshot schema revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial schema.
    V1 = 1,
}

impl SnapshotVersion {
    /// Revision written by this build.
    pub const CURRENT: Self = Self::V1;
}

/// Watchdog counters at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct WatchdogSnapshot {
    /// Quanta since the last kick.
    pub counter: u64,
    /// Expirations so far.
    pub expirations: u64,
}

/// Complete state of a [`crate::Machine`] at a quantum boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineSnapshot {
    /// Schema revision.
    pub version: SnapshotVersion,
    /// Name of the machine description it was taken from.
    pub machine: String,
    /// Quanta completed.
    pub quantum: u64,
    /// Cycles executed per device tag.
    pub executed: BTreeMap<String, u64>,
    /// Undelivered events per device tag.
    pub events: BTreeMap<String, Vec<DeviceEvent>>,
    /// Watchdog counters, when the machine has one.
    pub watchdog: Option<WatchdogSnapshot>,
    /// Watchdog-triggered resets so far.
    pub watchdog_resets: u64,
    /// RAM and share contents per block name.
    pub blocks: BTreeMap<String, Vec<u8>>,
    /// Selected page per bank name.
    pub banks: BTreeMap<String, u32>,
    /// Device records per tag.
    pub devices: BTreeMap<String, DeviceState>,
    /// Last data-bus value per space name.
    pub bus_values: BTreeMap<String, u32>,
    /// Live input levels per port tag.
    pub inputs: BTreeMap<String, Vec<u32>>,
    /// Coin counters and lockouts.
    pub bookkeeping: Bookkeeping,
}

impl MachineSnapshot {
    /// FNV-1a digest of the snapshot's contents, stable across hosts.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Fingerprint::default();
        hasher.text(&self.machine);
        hasher.number(self.quantum);
        for (tag, cycles) in &self.executed {
            hasher.text(tag);
            hasher.number(*cycles);
        }
        for (tag, events) in &self.events {
            hasher.text(tag);
            for event in events {
                match *event {
                    DeviceEvent::Interrupt { line } => hasher.bytes(&[0, line]),
                    DeviceEvent::Line { line, state } => hasher.bytes(&[1, line, u8::from(state)]),
                }
            }
        }
        if let Some(watchdog) = self.watchdog {
            hasher.number(watchdog.counter);
            hasher.number(watchdog.expirations);
        }
        hasher.number(self.watchdog_resets);
        for (name, data) in &self.blocks {
            hasher.text(name);
            hasher.bytes(data);
        }
        for (name, index) in &self.banks {
            hasher.text(name);
            hasher.number(u64::from(*index));
        }
        for (tag, state) in &self.devices {
            hasher.text(tag);
            for (field, value) in state.iter() {
                hasher.text(field);
                match value {
                    StateValue::U64(number) => hasher.number(*number),
                    StateValue::Bool(flag) => hasher.bytes(&[u8::from(*flag)]),
                    StateValue::Bytes(bytes) => hasher.bytes(bytes),
                }
            }
        }
        for (name, value) in &self.bus_values {
            hasher.text(name);
            hasher.number(u64::from(*value));
        }
        for (tag, levels) in &self.inputs {
            hasher.text(tag);
            for level in levels {
                hasher.number(u64::from(*level));
            }
        }
        for counter in self.bookkeeping.coin_counters {
            hasher.number(u64::from(counter));
        }
        for lockout in self.bookkeeping.lockouts {
            hasher.bytes(&[u8::from(lockout)]);
        }
        hasher.finish()
    }
}

struct Fingerprint(u64);

impl Default for Fingerprint {
    fn default() -> Self {
        Self(FNV_OFFSET)
    }
}

impl Fingerprint {
    fn bytes(&mut self, bytes: &[u8]) {
        self.0 = bytes
            .iter()
            .fold(self.0, |hash, &byte| fnv1a(hash, byte));
    }

    fn number(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    fn text(&mut self, text: &str) {
        self.number(text.len() as u64);
        self.bytes(text.as_bytes());
    }

    const fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{MachineSnapshot, SnapshotVersion};
    use crate::machine::Bookkeeping;

    fn empty() -> MachineSnapshot {
        MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            machine: "test".to_owned(),
            quantum: 0,
            executed: BTreeMap::new(),
            events: BTreeMap::new(),
            watchdog: None,
            watchdog_resets: 0,
            blocks: BTreeMap::new(),
            banks: BTreeMap::new(),
            devices: BTreeMap::new(),
            bus_values: BTreeMap::new(),
            inputs: BTreeMap::new(),
            bookkeeping: Bookkeeping::default(),
        }
    }

    #[test]
    fn current_snapshot_version_is_one() {
        assert_eq!(SnapshotVersion::CURRENT, SnapshotVersion::V1);
        assert_eq!(SnapshotVersion::CURRENT as u16, 1);
    }

    #[test]
    fn fingerprint_tracks_every_section() {
        let base = empty();
        let mut ram = empty();
        ram.blocks.insert("work".to_owned(), vec![0; 4]);
        let mut ram_changed = ram.clone();
        ram_changed.blocks.insert("work".to_owned(), vec![0, 0, 1, 0]);
        let mut counted = empty();
        counted.bookkeeping.coin_counters[2] = 1;

        assert_eq!(base.fingerprint(), empty().fingerprint());
        assert_ne!(base.fingerprint(), ram.fingerprint());
        assert_ne!(ram.fingerprint(), ram_changed.fingerprint());
        assert_ne!(base.fingerprint(), counted.fingerprint());
    }
}
