//! Memory-mapped bus dispatch and device-interconnect engine.
//!
//! A machine is described declaratively with [`MachineConfig`]: device
//! instances, the address maps each device masters, ROM regions, banks,
//! shared RAM, input ports and output-line wiring. [`MachineConfig::build`]
//! validates and resolves the description into a [`Machine`] whose devices
//! run quantum by quantum on one timeline and reach each other only through
//! their address spaces.

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;

/// Fatal configuration, ROM, input and snapshot errors.
pub mod error;
pub use error::{ConfigError, InputError, RomError, ScriptError, SnapshotError};

/// Access widths, byte order, RAM blocks and banks.
pub mod memory;
pub use memory::{
    lane_position, AccessWidth, Bank, BankId, BankPolicy, BankSpec, BlockId, Endianness,
    MemoryBlock, MemoryLayout, MemoryStore, RegionId,
};

/// Declarative address maps and their resolution into dispatch tables.
pub mod map;
pub use map::{AddressMap, BusConfig, EntryBuilder, MapEntry, Target, UnmappedRead};

/// Resolved address spaces and the bus view devices execute against.
pub mod dispatch;
pub use dispatch::{AddressSpace, Bus, PROGRAM};

/// Device contract, device type registry and built-in device models.
pub mod device;
pub use device::{
    AddressableLatch, Device, DeviceEvent, DeviceFactory, DeviceId, DeviceSetup, DeviceSpec,
    DeviceState, DeviceType, DeviceTypeRegistry, LineChange, OptionDecl, OptionKind, OptionValue,
    OutputLines, RomRequirement, SampleChip, ScriptOp, ScriptedMaster, StateValue,
    SAMPLE_CHIP_VOICES,
};

/// DIP switches and digital controls.
pub mod input;
pub use input::{
    DipSetting, FieldKind, InputPortSpec, InputPorts, InputType, PortField, PortId,
};

/// ROM tables, image sources and integrity checking.
pub mod rom;
pub use rom::{
    load_rom_table, DirectorySource, IntegrityPolicy, LoadKind, LoadedRoms, MemorySource,
    RomDigest, RomFileReport, RomFileSpec, RomFill, RomLoadOptions, RomRegionSpec, RomReport,
    RomSource, RomStatus, RomTable,
};

/// Timeline, periodic interrupts and the watchdog.
pub mod scheduler;
pub use scheduler::{
    PeriodicInterrupt, RefreshRate, Scheduler, SchedulerConfig, Watchdog, WatchdogConfig,
    DEFAULT_QUANTA_PER_FRAME,
};

/// Machine description, build and run loop.
pub mod machine;
pub use machine::{
    Bookkeeping, LineRoute, LineTarget, Machine, MachineConfig, ShareSpec, COIN_SLOTS,
};

/// Persisted machine state.
pub mod snapshot;
pub use snapshot::{MachineSnapshot, SnapshotVersion, WatchdogSnapshot};

/// Built-in machine descriptions.
pub mod boards;
pub use boards::{BoardInfo, Thoop2Variant, BOARDS};
