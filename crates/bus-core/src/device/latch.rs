use super::{Device, DeviceSetup, DeviceState, DeviceType, OptionDecl, OptionKind, OutputLines};
use super::RomRequirement;
use crate::memory::AccessWidth;
use crate::{ConfigError, SnapshotError};

/// Eight-output addressable latch (LS259 class).
///
/// A write to offset `n` stores one data bit into output `Q(n & 7)`; every
/// output change is reported as a line change for the machine to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressableLatch {
    outputs: u8,
    data_bit: u8,
}

const OPTIONS: &[OptionDecl] = &[OptionDecl {
    name: "data-bit",
    kind: OptionKind::Integer { min: 0, max: 7 },
    required: false,
}];

impl AddressableLatch {
    /// Registry entry for this model.
    pub const DEVICE_TYPE: DeviceType = DeviceType {
        name: "addressable-latch",
        options: OPTIONS,
        needs_clock: false,
        rom: RomRequirement::None,
        spaces: 0,
        factory: Self::create,
    };

    /// Creates a latch sampling data bit `data_bit`.
    #[must_use]
    pub const fn new(data_bit: u8) -> Self {
        Self {
            outputs: 0,
            data_bit,
        }
    }

    fn create(setup: &DeviceSetup<'_>) -> Result<Box<dyn Device>, ConfigError> {
        let data_bit = setup.integer("data-bit").unwrap_or(0);
        let data_bit = u8::try_from(data_bit)
            .map_err(|_| setup.invalid("data-bit", format!("{data_bit} is not a bit index")))?;
        Ok(Box::new(Self::new(data_bit)))
    }

    /// All eight outputs, `Q0` in bit 0.
    #[must_use]
    pub const fn outputs(&self) -> u8 {
        self.outputs
    }
}

impl Device for AddressableLatch {
    fn type_name(&self) -> &'static str {
        "addressable-latch"
    }

    fn read(&mut self, _offset: u32, _width: AccessWidth) -> u32 {
        u32::from(self.outputs)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, offset: u32, _width: AccessWidth, value: u32, lines: &mut OutputLines) {
        let line = (offset & 7) as u8;
        let state = (value >> self.data_bit) & 1 != 0;
        let mask = 1 << line;
        if (self.outputs & mask != 0) == state {
            return;
        }
        self.outputs ^= mask;
        lines.set(line, state);
    }

    fn reset(&mut self) {
        self.outputs = 0;
    }

    fn save_state(&self) -> DeviceState {
        let mut state = DeviceState::new();
        state.put_u64("outputs", u64::from(self.outputs));
        state
    }

    fn restore_state(&mut self, state: &DeviceState) -> Result<(), SnapshotError> {
        self.outputs = u8::try_from(state.u64("outputs")?).map_err(|_| SnapshotError::FieldRange {
            field: "outputs".to_owned(),
        })?;
        Ok(())
    }
}
