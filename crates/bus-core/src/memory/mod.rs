//! Bus geometry primitives and the backing stores every address space draws on.

mod bank;
mod block;

pub use bank::{Bank, BankPolicy, BankSpec};
pub use block::{MemoryBlock, MemoryLayout};

use crate::ConfigError;

/// Width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Long,
}

impl AccessWidth {
    /// Number of bytes moved by this access.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    /// Right-aligned value mask for this width.
    #[must_use]
    pub const fn value_mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => u32::MAX,
        }
    }

    /// Maps a byte count back to a width.
    #[must_use]
    pub const fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::Long),
            _ => None,
        }
    }
}

/// Byte order of a data bus or storage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Endianness {
    /// Lowest address holds the most significant byte.
    Big,
    /// Lowest address holds the least significant byte.
    Little,
}

/// Returns the data-bus lane mask and shift occupied by an access.
///
/// `offset` is the byte offset of the access inside its bus unit and the
/// access must not straddle units.
#[must_use]
pub const fn lane_position(
    bus: AccessWidth,
    endianness: Endianness,
    offset: u32,
    width: AccessWidth,
) -> (u32, u32) {
    let shift = match endianness {
        Endianness::Big => (bus.bytes() - offset - width.bytes()) * 8,
        Endianness::Little => offset * 8,
    };
    (width.value_mask() << shift, shift)
}

/// Bit shift of byte `index` of a bus unit.
pub(crate) const fn byte_shift(bus: AccessWidth, endianness: Endianness, index: u32) -> u32 {
    match endianness {
        Endianness::Big => (bus.bytes() - 1 - index) * 8,
        Endianness::Little => index * 8,
    }
}

/// Index of a ROM region inside a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub(crate) usize);

/// Index of a RAM or shared block inside a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// Index of a bank inside a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankId(pub(crate) usize);

/// Owner of every byte store in a machine: read-only ROM regions, writable
/// blocks (private RAM and named shares) and bank descriptors.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    regions: Vec<MemoryBlock>,
    blocks: Vec<MemoryBlock>,
    banks: Vec<Bank>,
}

impl MemoryStore {
    /// Creates a store over already-assembled ROM regions.
    #[must_use]
    pub const fn new(regions: Vec<MemoryBlock>) -> Self {
        Self {
            regions,
            blocks: Vec::new(),
            banks: Vec::new(),
        }
    }

    /// Looks up a ROM region by name.
    #[must_use]
    pub fn region_id(&self, name: &str) -> Option<RegionId> {
        self.regions
            .iter()
            .position(|region| region.name() == name)
            .map(RegionId)
    }

    /// Returns a ROM region.
    #[must_use]
    pub fn region(&self, id: RegionId) -> &MemoryBlock {
        &self.regions[id.0]
    }

    /// Iterates over ROM regions in declaration order.
    pub fn regions(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.regions.iter()
    }

    /// Allocates a zero-filled writable block.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateName`] when a block with this name exists.
    pub fn add_block(
        &mut self,
        name: &str,
        size: usize,
        layout: MemoryLayout,
    ) -> Result<BlockId, ConfigError> {
        if self.block_id(name).is_some() {
            return Err(ConfigError::DuplicateName {
                kind: "memory block",
                name: name.to_owned(),
            });
        }
        self.blocks.push(MemoryBlock::new(name, size, layout));
        Ok(BlockId(self.blocks.len() - 1))
    }

    /// Looks up a writable block by name.
    #[must_use]
    pub fn block_id(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|block| block.name() == name)
            .map(BlockId)
    }

    /// Returns a writable block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &MemoryBlock {
        &self.blocks[id.0]
    }

    /// Returns a writable block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut MemoryBlock {
        &mut self.blocks[id.0]
    }

    /// Iterates over writable blocks in allocation order.
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.iter()
    }

    /// Registers a bank over one of the ROM regions.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the name is taken, the region is unknown
    /// or the entries do not fit inside the region.
    pub fn add_bank(&mut self, spec: &BankSpec) -> Result<BankId, ConfigError> {
        if self.bank_id(&spec.name).is_some() {
            return Err(ConfigError::DuplicateName {
                kind: "bank",
                name: spec.name.clone(),
            });
        }
        let region = self
            .region_id(&spec.region)
            .ok_or_else(|| ConfigError::UnknownRomRegion {
                context: format!("bank `{}`", spec.name),
                region: spec.region.clone(),
            })?;
        let bank = Bank::new(spec, region, self.region(region).len())?;
        self.banks.push(bank);
        Ok(BankId(self.banks.len() - 1))
    }

    /// Looks up a bank by name.
    #[must_use]
    pub fn bank_id(&self, name: &str) -> Option<BankId> {
        self.banks
            .iter()
            .position(|bank| bank.name() == name)
            .map(BankId)
    }

    /// Returns a bank.
    #[must_use]
    pub fn bank(&self, id: BankId) -> &Bank {
        &self.banks[id.0]
    }

    /// Returns a bank mutably.
    pub fn bank_mut(&mut self, id: BankId) -> &mut Bank {
        &mut self.banks[id.0]
    }

    /// Iterates over banks in registration order.
    pub fn banks(&self) -> impl Iterator<Item = &Bank> {
        self.banks.iter()
    }
}
