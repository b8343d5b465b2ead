//! Dispatch core: turns an address and width into handler calls.
//!
//! Accesses wider than the bus, or straddling a bus unit, are split into
//! pieces in bus byte order. Each unit access is resolved by binary search over
//! the space's segment table; every binding whose lanes intersect the access
//! contributes its lanes, and lanes nobody serves read the unmapped value.

use tracing::{trace, warn};

use crate::device::{Device, DeviceId, LineChange, OutputLines};
use crate::input::InputPorts;
use crate::map::{Binding, BusConfig, Handler, SegmentTable, UnmappedRead};
use crate::memory::{lane_position, AccessWidth, Endianness, MemoryStore};
use crate::scheduler::Watchdog;

/// Resolved address space of one bus master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    name: String,
    bus: BusConfig,
    entries: Vec<String>,
    reads: SegmentTable,
    writes: SegmentTable,
    last_value: u32,
}

/// Machine state reachable from a bus access.
#[derive(Debug)]
pub(crate) struct BusContext<'a> {
    pub(crate) memory: &'a mut MemoryStore,
    pub(crate) devices: &'a mut [Option<Box<dyn Device>>],
    pub(crate) ports: &'a InputPorts,
    pub(crate) watchdog: &'a mut Option<Watchdog>,
    pub(crate) lines: &'a mut Vec<(DeviceId, LineChange)>,
}

impl AddressSpace {
    pub(crate) fn new(
        name: &str,
        bus: BusConfig,
        entries: Vec<String>,
        reads: SegmentTable,
        writes: SegmentTable,
    ) -> Self {
        Self {
            name: name.to_owned(),
            bus,
            entries,
            reads,
            writes,
            last_value: 0,
        }
    }

    /// Space name, `<device tag>:<map name>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus geometry.
    #[must_use]
    pub const fn bus(&self) -> BusConfig {
        self.bus
    }

    /// Last value driven on the data bus.
    #[must_use]
    pub const fn last_value(&self) -> u32 {
        self.last_value
    }

    pub(crate) fn set_last_value(&mut self, value: u32) {
        self.last_value = value & self.bus.data_mask();
    }

    /// Names of the entries serving reads at `addr`.
    #[must_use]
    pub fn readers_at(&self, addr: u32) -> Vec<&str> {
        self.entries_at(&self.reads, addr)
    }

    /// Names of the entries accepting writes at `addr`.
    #[must_use]
    pub fn writers_at(&self, addr: u32) -> Vec<&str> {
        self.entries_at(&self.writes, addr)
    }

    fn entries_at(&self, table: &SegmentTable, addr: u32) -> Vec<&str> {
        let unit = self.unit_of(addr & self.bus.address_mask());
        table
            .lookup(unit)
            .map(|segment| {
                segment
                    .bindings
                    .iter()
                    .map(|binding| self.entries[binding.entry].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn read_segments(&self) -> Vec<(u32, u32, usize)> {
        self.reads
            .iter()
            .map(|segment| (segment.start, segment.end, segment.bindings.len()))
            .collect()
    }

    const fn unit_of(&self, addr: u32) -> u32 {
        addr - addr % self.bus.width.bytes()
    }

    const fn unmapped_value(&self) -> u32 {
        match self.bus.unmapped {
            UnmappedRead::AllOnes => self.bus.data_mask(),
            UnmappedRead::AllZeros => 0,
            UnmappedRead::LastBusValue => self.last_value,
        }
    }

    /// Splits an access that does not fit one bus unit into pieces.
    fn pieces(&self, addr: u32, width: AccessWidth) -> Option<(AccessWidth, u32)> {
        let bus_bytes = self.bus.width.bytes();
        let bytes = width.bytes();
        if bytes <= bus_bytes && addr % bus_bytes + bytes <= bus_bytes {
            return None;
        }
        let piece = if bytes > bus_bytes && addr % bus_bytes == 0 {
            self.bus.width
        } else {
            AccessWidth::Byte
        };
        Some((piece, bytes / piece.bytes()))
    }

    pub(crate) fn read(&mut self, ctx: &mut BusContext<'_>, addr: u32, width: AccessWidth) -> u32 {
        let addr = addr & self.bus.address_mask();
        if let Some((piece, count)) = self.pieces(addr, width) {
            let bits = piece.bytes() * 8;
            let mut value = 0;
            for index in 0..count {
                let part_addr = addr.wrapping_add(index * piece.bytes());
                let part = self.read(ctx, part_addr, piece);
                value = match self.bus.endianness {
                    Endianness::Big => (value << bits) | part,
                    Endianness::Little => value | (part << (index * bits)),
                };
            }
            return value;
        }

        let unit = self.unit_of(addr);
        let (lanes, shift) =
            lane_position(self.bus.width, self.bus.endianness, addr - unit, width);
        (self.read_unit(ctx, unit, lanes) & lanes) >> shift
    }

    pub(crate) fn write(
        &mut self,
        ctx: &mut BusContext<'_>,
        addr: u32,
        width: AccessWidth,
        value: u32,
    ) {
        let addr = addr & self.bus.address_mask();
        let value = value & width.value_mask();
        if let Some((piece, count)) = self.pieces(addr, width) {
            let bits = piece.bytes() * 8;
            for index in 0..count {
                let part_addr = addr.wrapping_add(index * piece.bytes());
                let position = match self.bus.endianness {
                    Endianness::Big => count - 1 - index,
                    Endianness::Little => index,
                };
                let part = (value >> (position * bits)) & piece.value_mask();
                self.write(ctx, part_addr, piece, part);
            }
            return;
        }

        let unit = self.unit_of(addr);
        let (lanes, shift) =
            lane_position(self.bus.width, self.bus.endianness, addr - unit, width);
        self.write_unit(ctx, unit, lanes, value << shift);
    }

    fn read_unit(&mut self, ctx: &mut BusContext<'_>, unit: u32, lanes: u32) -> u32 {
        let unmapped = self.unmapped_value();
        let mut value = 0;
        let mut served = 0;
        if let Some(segment) = self.reads.lookup(unit) {
            for binding in &segment.bindings {
                let active = binding.lanes & lanes;
                if active == 0 {
                    continue;
                }
                value |= read_binding(&self.bus, ctx, binding, unit, active, unmapped) & active;
                served |= active;
            }
        }
        if served != lanes {
            trace!(
                space = %self.name,
                address = unit,
                lanes = lanes & !served,
                "unmapped read"
            );
            value |= unmapped & lanes & !served;
        }
        self.last_value = (self.last_value & !lanes) | (value & lanes);
        value
    }

    fn write_unit(&mut self, ctx: &mut BusContext<'_>, unit: u32, lanes: u32, value: u32) {
        let mut served = 0;
        if let Some(segment) = self.writes.lookup(unit) {
            for binding in &segment.bindings {
                let active = binding.lanes & lanes;
                if active == 0 {
                    continue;
                }
                write_binding(&self.bus, ctx, binding, unit, active, value);
                served |= active;
            }
        }
        if served != lanes {
            trace!(
                space = %self.name,
                address = unit,
                value,
                lanes = lanes & !served,
                "unmapped write dropped"
            );
        }
        self.last_value = (self.last_value & !lanes) | (value & lanes);
    }
}

/// Device-side view of an access: offset, width and data-bus shift.
fn device_access(bus: &BusConfig, binding: &Binding, unit: u32, lanes: u32) -> (u32, AccessWidth, u32) {
    let bus_bytes = bus.width.bytes();
    let span = binding.end.wrapping_sub(binding.start).wrapping_add(1);
    let within = unit - binding.start;
    if binding.lanes == bus.data_mask() {
        let shift = lanes.trailing_zeros();
        let bytes = lanes.count_ones() / 8;
        let first = match bus.endianness {
            Endianness::Big => bus_bytes - shift / 8 - bytes,
            Endianness::Little => shift / 8,
        };
        let offset = binding.select.wrapping_mul(span) + within + first;
        (offset, AccessWidth::from_bytes(bytes).unwrap_or(AccessWidth::Byte), shift)
    } else {
        let shift = binding.lanes.trailing_zeros();
        let bytes = binding.lanes.count_ones() / 8;
        let offset = binding.select.wrapping_mul(span / bus_bytes) + within / bus_bytes;
        (offset, AccessWidth::from_bytes(bytes).unwrap_or(AccessWidth::Byte), shift)
    }
}

fn read_binding(
    bus: &BusConfig,
    ctx: &mut BusContext<'_>,
    binding: &Binding,
    unit: u32,
    lanes: u32,
    unmapped: u32,
) -> u32 {
    let offset = unit - binding.start;
    match binding.handler {
        Handler::Rom { region, base } => ctx.memory.region(region).read_unit(
            base + offset,
            0,
            bus.width,
            bus.endianness,
            lanes,
        ),
        Handler::Block { block, xor } => {
            ctx.memory
                .block(block)
                .read_unit(offset, xor, bus.width, bus.endianness, lanes)
        }
        Handler::Bank { bank } => {
            let bank = ctx.memory.bank(bank);
            let page = bank.page_offset();
            ctx.memory.region(bank.region()).read_unit(
                page + offset,
                0,
                bus.width,
                bus.endianness,
                lanes,
            )
        }
        Handler::Port(port) => {
            let value = ctx.ports.value(port);
            if binding.lanes == bus.data_mask() {
                value
            } else {
                let (_, width, shift) = device_access(bus, binding, unit, lanes);
                (value & width.value_mask()) << shift
            }
        }
        Handler::Device(device) => {
            let (device_offset, width, shift) = device_access(bus, binding, unit, lanes);
            match ctx.devices.get_mut(device.0).and_then(Option::as_mut) {
                Some(handler) => (handler.read(device_offset, width) & width.value_mask()) << shift,
                None => {
                    warn!(device = device.0, "read reached a device that is mid-execution");
                    unmapped
                }
            }
        }
        Handler::BankSelect { .. } | Handler::Watchdog | Handler::Nop => unmapped,
    }
}

fn write_binding(
    bus: &BusConfig,
    ctx: &mut BusContext<'_>,
    binding: &Binding,
    unit: u32,
    lanes: u32,
    value: u32,
) {
    let offset = unit - binding.start;
    match binding.handler {
        Handler::Block { block, xor } => ctx.memory.block_mut(block).write_unit(
            offset,
            xor,
            bus.width,
            bus.endianness,
            value,
            lanes,
        ),
        Handler::BankSelect { bank, shift } => {
            let data = (value & lanes) >> lanes.trailing_zeros();
            let raw = data.checked_shr(u32::from(shift)).unwrap_or(0);
            let bank = ctx.memory.bank_mut(bank);
            let selected = bank.select(raw);
            trace!(bank = bank.name(), raw, selected, "bank switched");
        }
        Handler::Device(device) => {
            let (device_offset, width, shift) = device_access(bus, binding, unit, lanes);
            match ctx.devices.get_mut(device.0).and_then(Option::as_mut) {
                Some(handler) => {
                    let mut lines = OutputLines::default();
                    handler.write(
                        device_offset,
                        width,
                        (value >> shift) & width.value_mask(),
                        &mut lines,
                    );
                    ctx.lines.extend(lines.drain().map(|change| (device, change)));
                }
                None => warn!(device = device.0, "write reached a device that is mid-execution"),
            }
        }
        Handler::Watchdog => {
            if let Some(watchdog) = ctx.watchdog.as_mut() {
                watchdog.service();
            }
        }
        Handler::Rom { .. } | Handler::Bank { .. } | Handler::Port(_) | Handler::Nop => {}
    }
}

/// Index of the first space a device masters.
pub const PROGRAM: usize = 0;

/// A device's window onto the machine while it executes.
///
/// Space indices are local to the device, in the order its address maps
/// were declared.
#[derive(Debug)]
pub struct Bus<'a> {
    spaces: &'a mut [AddressSpace],
    own: &'a [usize],
    ctx: BusContext<'a>,
}

impl<'a> Bus<'a> {
    pub(crate) fn new(
        spaces: &'a mut [AddressSpace],
        own: &'a [usize],
        ctx: BusContext<'a>,
    ) -> Self {
        Self { spaces, own, ctx }
    }

    /// Number of spaces the device masters.
    #[must_use]
    pub fn space_count(&self) -> usize {
        self.own.len()
    }

    /// Reads through local space `space`.
    pub fn read(&mut self, space: usize, addr: u32, width: AccessWidth) -> u32 {
        match self.own.get(space) {
            Some(&index) => self.spaces[index].read(&mut self.ctx, addr, width),
            None => {
                warn!(space, "read through an address space the device does not master");
                width.value_mask()
            }
        }
    }

    /// Writes through local space `space`.
    pub fn write(&mut self, space: usize, addr: u32, width: AccessWidth, value: u32) {
        match self.own.get(space) {
            Some(&index) => self.spaces[index].write(&mut self.ctx, addr, width, value),
            None => warn!(space, "write through an address space the device does not master"),
        }
    }

    /// Reads a byte from the program space.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read8(&mut self, addr: u32) -> u8 {
        self.read(PROGRAM, addr, AccessWidth::Byte) as u8
    }

    /// Reads a word from the program space.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read16(&mut self, addr: u32) -> u16 {
        self.read(PROGRAM, addr, AccessWidth::Word) as u16
    }

    /// Reads a long word from the program space.
    pub fn read32(&mut self, addr: u32) -> u32 {
        self.read(PROGRAM, addr, AccessWidth::Long)
    }

    /// Writes a byte to the program space.
    pub fn write8(&mut self, addr: u32, value: u8) {
        self.write(PROGRAM, addr, AccessWidth::Byte, u32::from(value));
    }

    /// Writes a word to the program space.
    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write(PROGRAM, addr, AccessWidth::Word, u32::from(value));
    }

    /// Writes a long word to the program space.
    pub fn write32(&mut self, addr: u32, value: u32) {
        self.write(PROGRAM, addr, AccessWidth::Long, value);
    }
}
