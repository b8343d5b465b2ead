use super::{byte_shift, AccessWidth, Endianness};

/// Storage layout of a block: byte order of its storage units and their width.
///
/// A view whose bus byte order differs from the layout sees the block through
/// an XOR swizzle of `unit bytes - 1` on byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryLayout {
    /// Byte order of a storage unit.
    pub endianness: Endianness,
    /// Storage unit width.
    pub unit: AccessWidth,
}

impl MemoryLayout {
    /// Plain byte storage; every view sees it unswizzled.
    pub const BYTES: Self = Self {
        endianness: Endianness::Big,
        unit: AccessWidth::Byte,
    };

    /// Creates a layout.
    #[must_use]
    pub const fn new(endianness: Endianness, unit: AccessWidth) -> Self {
        Self { endianness, unit }
    }

    /// XOR applied to byte offsets by a view of byte order `view`.
    #[must_use]
    pub fn swizzle_for(self, view: Endianness) -> u32 {
        if self.unit == AccessWidth::Byte || self.endianness == view {
            0
        } else {
            self.unit.bytes() - 1
        }
    }
}

/// Named byte store backing ROM regions, RAM and shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    name: String,
    layout: MemoryLayout,
    data: Vec<u8>,
}

impl MemoryBlock {
    /// Creates a zero-filled block.
    #[must_use]
    pub fn new(name: &str, size: usize, layout: MemoryLayout) -> Self {
        Self {
            name: name.to_owned(),
            layout,
            data: vec![0; size],
        }
    }

    /// Wraps existing bytes.
    #[must_use]
    pub fn from_bytes(name: &str, data: Vec<u8>, layout: MemoryLayout) -> Self {
        Self {
            name: name.to_owned(),
            layout,
            data,
        }
    }

    /// Block name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage layout.
    #[must_use]
    pub const fn layout(&self) -> MemoryLayout {
        self.layout
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-sized block.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw storage bytes, in storage order.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw storage bytes, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reads one byte through a swizzle; out-of-range offsets read zero.
    #[must_use]
    pub fn read_byte(&self, offset: u32, xor: u32) -> u8 {
        self.data
            .get((offset ^ xor) as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Writes one byte through a swizzle; out-of-range offsets are ignored.
    pub fn write_byte(&mut self, offset: u32, xor: u32, value: u8) {
        if let Some(slot) = self.data.get_mut((offset ^ xor) as usize) {
            *slot = value;
        }
    }

    /// Reads the bus unit starting at byte `offset`, filling only the lanes in `lanes`.
    #[must_use]
    pub fn read_unit(
        &self,
        offset: u32,
        xor: u32,
        bus: AccessWidth,
        endianness: Endianness,
        lanes: u32,
    ) -> u32 {
        let mut value = 0;
        for index in 0..bus.bytes() {
            let shift = byte_shift(bus, endianness, index);
            if lanes & (0xFF << shift) != 0 {
                value |= u32::from(self.read_byte(offset + index, xor)) << shift;
            }
        }
        value
    }

    /// Writes the bus unit starting at byte `offset`; lanes outside `lanes` keep their bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_unit(
        &mut self,
        offset: u32,
        xor: u32,
        bus: AccessWidth,
        endianness: Endianness,
        value: u32,
        lanes: u32,
    ) {
        for index in 0..bus.bytes() {
            let shift = byte_shift(bus, endianness, index);
            if lanes & (0xFF << shift) != 0 {
                self.write_byte(offset + index, xor, (value >> shift) as u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryBlock, MemoryLayout};
    use crate::memory::{AccessWidth, Endianness};

    #[test]
    fn swizzle_is_zero_for_matching_order_or_byte_units() {
        let little_words = MemoryLayout::new(Endianness::Little, AccessWidth::Word);
        assert_eq!(little_words.swizzle_for(Endianness::Little), 0);
        assert_eq!(little_words.swizzle_for(Endianness::Big), 1);
        assert_eq!(MemoryLayout::BYTES.swizzle_for(Endianness::Little), 0);
        let little_longs = MemoryLayout::new(Endianness::Little, AccessWidth::Long);
        assert_eq!(little_longs.swizzle_for(Endianness::Big), 3);
    }

    #[test]
    fn big_endian_word_view_of_little_endian_storage_is_host_native() {
        let layout = MemoryLayout::new(Endianness::Little, AccessWidth::Word);
        let mut block = MemoryBlock::new("share", 4, layout);
        let xor = layout.swizzle_for(Endianness::Big);
        block.write_unit(0, xor, AccessWidth::Word, Endianness::Big, 0x1234, 0xFFFF);
        assert_eq!(block.as_bytes()[..2], [0x34, 0x12]);
        assert_eq!(
            block.read_unit(0, xor, AccessWidth::Word, Endianness::Big, 0xFFFF),
            0x1234
        );
        assert_eq!(block.read_byte(0, xor), 0x12);
    }

    #[test]
    fn masked_write_keeps_inactive_lane() {
        let mut block = MemoryBlock::new("ram", 2, MemoryLayout::BYTES);
        block.write_unit(0, 0, AccessWidth::Word, Endianness::Big, 0xAABB, 0xFFFF);
        block.write_unit(0, 0, AccessWidth::Word, Endianness::Big, 0x00CC, 0x00FF);
        assert_eq!(block.as_bytes(), &[0xAA, 0xCC]);
        assert_eq!(
            block.read_unit(0, 0, AccessWidth::Word, Endianness::Big, 0xFF00),
            0xAA00
        );
    }

    #[test]
    fn out_of_range_bytes_read_zero_and_drop_writes() {
        let mut block = MemoryBlock::new("tiny", 1, MemoryLayout::BYTES);
        block.write_byte(4, 0, 0x55);
        assert_eq!(block.read_byte(4, 0), 0);
        assert_eq!(block.as_bytes(), &[0]);
    }
}
