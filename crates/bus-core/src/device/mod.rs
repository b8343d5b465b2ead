//! Device contract, per-device state records and the built-in device models.

mod latch;
mod registry;
mod sample_chip;
mod scripted;

pub use latch::AddressableLatch;
pub use registry::{
    DeviceFactory, DeviceSetup, DeviceSpec, DeviceType, DeviceTypeRegistry, OptionDecl, OptionKind,
    OptionValue, RomRequirement,
};
pub use sample_chip::{SampleChip, SAMPLE_CHIP_VOICES};
pub use scripted::{ScriptOp, ScriptedMaster};

use std::collections::BTreeMap;
use std::fmt;

use crate::dispatch::Bus;
use crate::memory::AccessWidth;
use crate::SnapshotError;

/// Index of a device inside a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub(crate) usize);

/// Level change on one of a device's output lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineChange {
    /// Output line number.
    pub line: u8,
    /// New level.
    pub state: bool,
}

/// Output-line changes collected while a device handles an access.
#[derive(Debug, Default)]
pub struct OutputLines {
    changes: Vec<LineChange>,
}

impl OutputLines {
    /// Records a level change.
    pub fn set(&mut self, line: u8, state: bool) {
        self.changes.push(LineChange { line, state });
    }

    /// Takes the recorded changes in emission order.
    pub fn drain(&mut self) -> impl Iterator<Item = LineChange> + '_ {
        self.changes.drain(..)
    }

    /// Returns `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Asynchronous notification delivered at the start of a device's quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DeviceEvent {
    /// Interrupt asserted and held until the device takes it.
    Interrupt {
        /// Interrupt level.
        line: u8,
    },
    /// Input line driven by another device's output.
    Line {
        /// Input line number.
        line: u8,
        /// New level.
        state: bool,
    },
}

/// One recorded device field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StateValue {
    /// Unsigned integer.
    U64(u64),
    /// Flag.
    Bool(bool),
    /// Byte string.
    Bytes(Vec<u8>),
}

/// Named fields making up a device's persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceState {
    fields: BTreeMap<String, StateValue>,
}

impl DeviceState {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an integer field.
    pub fn put_u64(&mut self, field: &str, value: u64) {
        self.fields.insert(field.to_owned(), StateValue::U64(value));
    }

    /// Stores a flag field.
    pub fn put_bool(&mut self, field: &str, value: bool) {
        self.fields.insert(field.to_owned(), StateValue::Bool(value));
    }

    /// Stores a byte-string field.
    pub fn put_bytes(&mut self, field: &str, value: Vec<u8>) {
        self.fields.insert(field.to_owned(), StateValue::Bytes(value));
    }

    /// Reads an integer field.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Field`] when absent or not an integer.
    pub fn u64(&self, field: &str) -> Result<u64, SnapshotError> {
        match self.fields.get(field) {
            Some(StateValue::U64(value)) => Ok(*value),
            _ => Err(missing(field)),
        }
    }

    /// Reads an integer field that must fit in `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Field`] when absent or [`SnapshotError::FieldRange`]
    /// when too large.
    pub fn u32(&self, field: &str) -> Result<u32, SnapshotError> {
        u32::try_from(self.u64(field)?).map_err(|_| SnapshotError::FieldRange {
            field: field.to_owned(),
        })
    }

    /// Reads a flag field.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Field`] when absent or not a flag.
    pub fn bool(&self, field: &str) -> Result<bool, SnapshotError> {
        match self.fields.get(field) {
            Some(StateValue::Bool(value)) => Ok(*value),
            _ => Err(missing(field)),
        }
    }

    /// Reads a byte-string field.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Field`] when absent or not a byte string.
    pub fn bytes(&self, field: &str) -> Result<&[u8], SnapshotError> {
        match self.fields.get(field) {
            Some(StateValue::Bytes(value)) => Ok(value),
            _ => Err(missing(field)),
        }
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

fn missing(field: &str) -> SnapshotError {
    SnapshotError::Field {
        field: field.to_owned(),
    }
}

/// Contract every device instance honors.
///
/// `read`/`write` serve accesses other masters make to the device's mapped
/// handlers. `offset` is the byte offset inside the mapped range for
/// full-width mappings, or the bus-unit index for lane-restricted mappings,
/// plus the select copy index scaled by the range size. Values are
/// right-aligned to `width`.
pub trait Device: fmt::Debug {
    /// Short type name for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Serves a read of one of the device's handlers.
    fn read(&mut self, offset: u32, width: AccessWidth) -> u32;

    /// Serves a write of one of the device's handlers; output-line changes go to `lines`.
    fn write(&mut self, offset: u32, width: AccessWidth, value: u32, lines: &mut OutputLines);

    /// Returns the device to its power-on state.
    fn reset(&mut self);

    /// Captures the device's state.
    fn save_state(&self) -> DeviceState;

    /// Restores a state captured by [`Device::save_state`].
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] when a field is missing or out of range.
    fn restore_state(&mut self, state: &DeviceState) -> Result<(), SnapshotError>;

    /// Returns `true` when the scheduler should give this device cycles.
    fn is_executable(&self) -> bool {
        false
    }

    /// Runs for up to `cycles` clock cycles against the device's own spaces.
    ///
    /// Returns the cycles consumed; overshoot is carried into the next quantum.
    fn execute(&mut self, bus: &mut Bus<'_>, cycles: u64) -> u64 {
        let _ = bus;
        let _ = cycles;
        0
    }

    /// Receives a queued event.
    fn handle_event(&mut self, event: DeviceEvent) {
        let _ = event;
    }
}

/// FNV-1a accumulation used by device models to fingerprint the bytes they observe.
pub(crate) const fn fnv1a(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01B3)
}

/// FNV-1a offset basis.
pub(crate) const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

#[cfg(test)]
mod tests {
    use super::{DeviceState, OutputLines};
    use crate::SnapshotError;

    #[test]
    fn state_fields_are_typed() {
        let mut state = DeviceState::new();
        state.put_u64("pc", 3);
        state.put_bool("halted", true);
        state.put_bytes("ram", vec![1, 2]);
        assert_eq!(state.u64("pc"), Ok(3));
        assert_eq!(state.u32("pc"), Ok(3));
        assert_eq!(state.bool("halted"), Ok(true));
        assert_eq!(state.bytes("ram"), Ok(&[1_u8, 2][..]));
        assert!(matches!(state.u64("halted"), Err(SnapshotError::Field { .. })));
        assert!(matches!(state.bool("absent"), Err(SnapshotError::Field { .. })));

        state.put_u64("wide", u64::MAX);
        assert!(matches!(state.u32("wide"), Err(SnapshotError::FieldRange { .. })));
        assert_eq!(state.iter().count(), 4);
    }

    #[test]
    fn output_lines_drain_in_emission_order() {
        let mut lines = OutputLines::default();
        lines.set(2, true);
        lines.set(0, false);
        let drained: Vec<_> = lines.drain().map(|change| (change.line, change.state)).collect();
        assert_eq!(drained, vec![(2, true), (0, false)]);
        assert!(lines.is_empty());
    }
}
