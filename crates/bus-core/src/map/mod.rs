//! Declarative address maps and their resolution into dispatch tables.
//!
//! An [`AddressMap`] lists named ranges with inclusive bounds. Each range has an
//! optional read [`Target`] and an optional write [`Target`], a byte-lane mask,
//! and mirror/select bits that replicate it across the space. Resolution turns a
//! map into an [`crate::AddressSpace`] or rejects it with a [`crate::ConfigError`].

mod resolve;

pub(crate) use resolve::{resolve, Binding, Handler, ResolveEnv, SegmentTable};

use crate::memory::{AccessWidth, Endianness};

/// Value returned for reads no entry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum UnmappedRead {
    /// Every data line reads high.
    AllOnes,
    /// Every data line reads low.
    AllZeros,
    /// The data bus keeps the last value driven on it.
    LastBusValue,
}

/// Geometry of one address space's bus.
///
/// There is no default: every space states its unmapped read value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusConfig {
    /// Data-bus width.
    pub width: AccessWidth,
    /// Byte order of the data bus.
    pub endianness: Endianness,
    /// Number of address lines.
    pub address_bits: u8,
    /// Value of undriven data lines.
    pub unmapped: UnmappedRead,
}

impl BusConfig {
    /// Creates a bus description.
    #[must_use]
    pub const fn new(
        width: AccessWidth,
        endianness: Endianness,
        address_bits: u8,
        unmapped: UnmappedRead,
    ) -> Self {
        Self {
            width,
            endianness,
            address_bits,
            unmapped,
        }
    }

    /// Mask of valid address bits.
    #[must_use]
    pub const fn address_mask(&self) -> u32 {
        if self.address_bits >= 32 {
            u32::MAX
        } else {
            (1 << self.address_bits) - 1
        }
    }

    /// Mask covering every data lane.
    #[must_use]
    pub const fn data_mask(&self) -> u32 {
        self.width.value_mask()
    }
}

/// What an entry is bound to on one side of the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Target {
    /// Read-only window into a ROM region starting at `offset`.
    Rom {
        /// Region name.
        region: String,
        /// Region offset of the entry's first byte.
        offset: u32,
    },
    /// Private RAM owned by the entry; reads and writes share one block.
    Ram,
    /// Named shared block, visible to every space that maps it.
    Share(String),
    /// Read-only window onto a bank's current page.
    Bank(String),
    /// Write-only register selecting a bank's page from `value >> shift`.
    BankSelect {
        /// Bank name.
        bank: String,
        /// Right shift applied to the written value.
        shift: u8,
    },
    /// Read-only input port.
    Port(String),
    /// Handlers of another device.
    Device(String),
    /// Write-only watchdog kick register.
    Watchdog,
    /// Accepts writes and serves reads with the unmapped value, without logging.
    Nop,
}

impl Target {
    /// Returns `true` when this target may serve reads.
    #[must_use]
    pub const fn readable(&self) -> bool {
        !matches!(self, Self::BankSelect { .. } | Self::Watchdog)
    }

    /// Returns `true` when this target may accept writes.
    #[must_use]
    pub const fn writable(&self) -> bool {
        !matches!(self, Self::Rom { .. } | Self::Bank(_) | Self::Port(_))
    }
}

/// One named range of an [`AddressMap`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MapEntry {
    /// Name used in diagnostics.
    pub name: String,
    /// Inclusive start address.
    pub start: u32,
    /// Inclusive end address.
    pub end: u32,
    /// Read-side binding.
    pub read: Option<Target>,
    /// Write-side binding.
    pub write: Option<Target>,
    /// Data lanes served; `None` means the whole bus.
    pub lanes: Option<u32>,
    /// Address bits ignored by decoding; each combination repeats the entry.
    pub mirror: u32,
    /// Address bits that repeat the entry and pass the copy index to a device.
    pub select: u32,
}

impl MapEntry {
    /// Number of bytes covered by one copy of the entry.
    #[must_use]
    pub const fn span(&self) -> u64 {
        self.end as u64 - self.start as u64 + 1
    }
}

/// Declarative address map of one bus master.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressMap {
    /// Space name, unique within its device.
    pub name: String,
    /// Bus geometry.
    pub bus: BusConfig,
    /// Entries in declaration order.
    pub entries: Vec<MapEntry>,
}

impl AddressMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new(name: &str, bus: BusConfig) -> Self {
        Self {
            name: name.to_owned(),
            bus,
            entries: Vec::new(),
        }
    }

    /// Starts a new entry covering `start..=end` and returns its builder.
    pub fn range(&mut self, start: u32, end: u32) -> EntryBuilder<'_> {
        let name = format!("{start:#x}-{end:#x}");
        self.entries.push(MapEntry {
            name,
            start,
            end,
            read: None,
            write: None,
            lanes: None,
            mirror: 0,
            select: 0,
        });
        let index = self.entries.len() - 1;
        EntryBuilder {
            entry: &mut self.entries[index],
        }
    }
}

/// Chained configuration of the entry most recently added by [`AddressMap::range`].
#[derive(Debug)]
pub struct EntryBuilder<'a> {
    entry: &'a mut MapEntry,
}

impl EntryBuilder<'_> {
    /// Names the entry for diagnostics.
    pub fn name(self, name: &str) -> Self {
        name.clone_into(&mut self.entry.name);
        self
    }

    /// Binds the read side.
    pub fn read(self, target: Target) -> Self {
        self.entry.read = Some(target);
        self
    }

    /// Binds the write side.
    pub fn write(self, target: Target) -> Self {
        self.entry.write = Some(target);
        self
    }

    /// Maps a ROM window starting at `offset` of `region`.
    pub fn rom(self, region: &str, offset: u32) -> Self {
        self.read(Target::Rom {
            region: region.to_owned(),
            offset,
        })
    }

    /// Maps private read/write RAM.
    pub fn ram(self) -> Self {
        self.read(Target::Ram).write(Target::Ram)
    }

    /// Maps a named share for reads and writes.
    pub fn share(self, name: &str) -> Self {
        self.read(Target::Share(name.to_owned()))
            .write(Target::Share(name.to_owned()))
    }

    /// Maps a named share for writes only.
    pub fn write_share(self, name: &str) -> Self {
        self.write(Target::Share(name.to_owned()))
    }

    /// Maps a bank window for reads.
    pub fn bank(self, name: &str) -> Self {
        self.read(Target::Bank(name.to_owned()))
    }

    /// Maps a bank-select register for writes.
    pub fn write_bank_select(self, bank: &str, shift: u8) -> Self {
        self.write(Target::BankSelect {
            bank: bank.to_owned(),
            shift,
        })
    }

    /// Maps an input port for reads.
    pub fn port(self, tag: &str) -> Self {
        self.read(Target::Port(tag.to_owned()))
    }

    /// Maps a device for reads and writes.
    pub fn device(self, tag: &str) -> Self {
        self.read(Target::Device(tag.to_owned()))
            .write(Target::Device(tag.to_owned()))
    }

    /// Maps a device for writes only.
    pub fn write_device(self, tag: &str) -> Self {
        self.write(Target::Device(tag.to_owned()))
    }

    /// Maps the watchdog kick register.
    pub fn write_watchdog(self) -> Self {
        self.write(Target::Watchdog)
    }

    /// Maps a silent sink on both sides.
    pub fn nop(self) -> Self {
        self.read(Target::Nop).write(Target::Nop)
    }

    /// Restricts the entry to the data lanes in `mask`.
    pub fn lanes(self, mask: u32) -> Self {
        self.entry.lanes = Some(mask);
        self
    }

    /// Repeats the entry for every combination of `bits`.
    pub fn mirror(self, bits: u32) -> Self {
        self.entry.mirror = bits;
        self
    }

    /// Repeats the entry for every combination of `bits`, passing the copy index to devices.
    pub fn select(self, bits: u32) -> Self {
        self.entry.select = bits;
        self
    }
}
