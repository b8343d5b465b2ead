//! Interconnect resolution: expands replicated entries, validates every
//! binding against the machine's stores and builds the segment tables the
//! dispatch core searches.

use tracing::debug;

use super::{AddressMap, BusConfig, MapEntry, Target};
use crate::device::DeviceId;
use crate::dispatch::AddressSpace;
use crate::input::{InputPorts, PortId};
use crate::memory::{BankId, BlockId, MemoryLayout, MemoryStore, RegionId};
use crate::ConfigError;

/// Most address bits one entry may replicate over.
pub(crate) const MAX_REPLICATION_BITS: u32 = 12;

/// Machine-wide lookups a map is resolved against.
pub(crate) struct ResolveEnv<'a> {
    pub(crate) memory: &'a mut MemoryStore,
    pub(crate) ports: &'a InputPorts,
    pub(crate) devices: &'a [String],
    pub(crate) owner: Option<usize>,
    pub(crate) has_watchdog: bool,
}

/// Concrete handler a binding dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    Rom { region: RegionId, base: u32 },
    Block { block: BlockId, xor: u32 },
    Bank { bank: BankId },
    BankSelect { bank: BankId, shift: u8 },
    Port(PortId),
    Device(DeviceId),
    Watchdog,
    Nop,
}

/// One concrete copy of an entry on one side of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) entry: usize,
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) lanes: u32,
    pub(crate) select: u32,
    pub(crate) handler: Handler,
}

/// Elementary address interval with a constant set of bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) bindings: Vec<Binding>,
}

/// Sorted, non-overlapping segments for one direction of one space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SegmentTable {
    segments: Vec<Segment>,
}

impl SegmentTable {
    #[allow(clippy::cast_possible_truncation)]
    fn build(bindings: &[Binding]) -> Self {
        let mut bounds: Vec<u64> = bindings
            .iter()
            .flat_map(|binding| [u64::from(binding.start), u64::from(binding.end) + 1])
            .collect();
        bounds.sort_unstable();
        bounds.dedup();

        let mut segments = Vec::new();
        let mut active: Vec<Binding> = Vec::new();
        let mut next = 0;
        for pair in bounds.windows(2) {
            let (low, high) = (pair[0], pair[1]);
            while next < bindings.len() && u64::from(bindings[next].start) <= low {
                active.push(bindings[next]);
                next += 1;
            }
            active.retain(|binding| u64::from(binding.end) >= low);
            if !active.is_empty() {
                segments.push(Segment {
                    start: low as u32,
                    end: (high - 1) as u32,
                    bindings: active.clone(),
                });
            }
        }
        Self { segments }
    }

    /// Finds the segment containing `addr` by binary search.
    pub(crate) fn lookup(&self, addr: u32) -> Option<&Segment> {
        let index = self.segments.partition_point(|segment| segment.end < addr);
        self.segments
            .get(index)
            .filter(|segment| segment.start <= addr)
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.len()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}

/// Resolves `map` into an address space named `name`.
pub(crate) fn resolve(
    name: &str,
    map: &AddressMap,
    env: &mut ResolveEnv<'_>,
) -> Result<AddressSpace, ConfigError> {
    let bus = map.bus;
    let mut reads = Vec::new();
    let mut writes = Vec::new();

    for (index, entry) in map.entries.iter().enumerate() {
        check_geometry(name, &bus, entry)?;
        let lanes = entry.lanes.unwrap_or_else(|| bus.data_mask());
        if !valid_lanes(&bus, lanes) {
            return Err(ConfigError::InvalidLaneMask {
                space: name.to_owned(),
                entry: entry.name.clone(),
                lanes,
            });
        }
        if entry.read.is_none() && entry.write.is_none() {
            return Err(ConfigError::NoTarget {
                space: name.to_owned(),
                entry: entry.name.clone(),
            });
        }

        let mut ram = None;
        let read = match &entry.read {
            Some(target) if !target.readable() => {
                return Err(ConfigError::NotReadable {
                    space: name.to_owned(),
                    entry: entry.name.clone(),
                })
            }
            Some(target) => Some(bind(name, &bus, entry, target, &mut ram, env)?),
            None => None,
        };
        let write = match &entry.write {
            Some(target) if !target.writable() => {
                return Err(ConfigError::NotWritable {
                    space: name.to_owned(),
                    entry: entry.name.clone(),
                })
            }
            Some(target) => Some(bind(name, &bus, entry, target, &mut ram, env)?),
            None => None,
        };

        for (start, end, select) in copies(entry) {
            let binding = |handler| Binding {
                entry: index,
                start,
                end,
                lanes,
                select,
                handler,
            };
            if let Some(handler) = read {
                reads.push(binding(handler));
            }
            if let Some(handler) = write {
                writes.push(binding(handler));
            }
        }
    }

    check_overlaps(name, map, &mut reads)?;
    check_overlaps(name, map, &mut writes)?;
    let reads = SegmentTable::build(&reads);
    let writes = SegmentTable::build(&writes);
    debug!(
        space = name,
        entries = map.entries.len(),
        read_segments = reads.len(),
        write_segments = writes.len(),
        "address space resolved"
    );
    Ok(AddressSpace::new(
        name,
        bus,
        map.entries.iter().map(|entry| entry.name.clone()).collect(),
        reads,
        writes,
    ))
}

fn check_geometry(space: &str, bus: &BusConfig, entry: &MapEntry) -> Result<(), ConfigError> {
    if entry.start > entry.end {
        return Err(ConfigError::EmptyRange {
            space: space.to_owned(),
            entry: entry.name.clone(),
            start: entry.start,
            end: entry.end,
        });
    }

    let invalid_mirror = |reason: &str| ConfigError::InvalidMirror {
        space: space.to_owned(),
        entry: entry.name.clone(),
        reason: reason.to_owned(),
    };
    let replicated = entry.mirror | entry.select;
    if entry.mirror & entry.select != 0 {
        return Err(invalid_mirror("mirror and select bits intersect"));
    }
    if replicated.count_ones() > MAX_REPLICATION_BITS {
        return Err(invalid_mirror("too many replicated address bits"));
    }
    let varying = match entry.start ^ entry.end {
        0 => 0,
        diff => u32::MAX >> diff.leading_zeros(),
    };
    if replicated & (varying | entry.start) != 0 {
        return Err(invalid_mirror("replicated bits overlap the range"));
    }

    let highest = entry.end | replicated;
    if highest & !bus.address_mask() != 0 {
        return Err(ConfigError::RangeOutOfSpace {
            space: space.to_owned(),
            entry: entry.name.clone(),
            start: entry.start,
            end: highest,
            bits: bus.address_bits,
        });
    }

    let unit = bus.width.bytes();
    if entry.start % unit != 0 || (u64::from(entry.end) + 1) % u64::from(unit) != 0 {
        return Err(ConfigError::MisalignedRange {
            space: space.to_owned(),
            entry: entry.name.clone(),
            start: entry.start,
            end: entry.end,
            unit,
        });
    }
    Ok(())
}

fn valid_lanes(bus: &BusConfig, lanes: u32) -> bool {
    if lanes == 0 || lanes & !bus.data_mask() != 0 {
        return false;
    }
    (0..bus.width.bytes()).all(|index| matches!((lanes >> (index * 8)) & 0xFF, 0 | 0xFF))
}

/// Enumerates `(start, end, select index)` for every replicated copy.
fn copies(entry: &MapEntry) -> Vec<(u32, u32, u32)> {
    let replicated = entry.mirror | entry.select;
    let bits: Vec<u32> = (0..32).filter(|bit| replicated & (1 << bit) != 0).collect();
    (0..1_u32 << bits.len())
        .map(|combination| {
            let mut offset = 0;
            let mut select = 0;
            let mut select_position = 0;
            for (index, bit) in bits.iter().enumerate() {
                let set = combination & (1 << index) != 0;
                if set {
                    offset |= 1 << bit;
                }
                if entry.select & (1 << bit) != 0 {
                    if set {
                        select |= 1 << select_position;
                    }
                    select_position += 1;
                }
            }
            (entry.start | offset, entry.end | offset, select)
        })
        .collect()
}

fn bind(
    space: &str,
    bus: &BusConfig,
    entry: &MapEntry,
    target: &Target,
    ram: &mut Option<BlockId>,
    env: &mut ResolveEnv<'_>,
) -> Result<Handler, ConfigError> {
    let span = entry.span();
    let out_of_range = |backing: &str, needed: u64, available: u64| ConfigError::WindowOutOfRange {
        space: space.to_owned(),
        entry: entry.name.clone(),
        backing: backing.to_owned(),
        needed,
        available,
    };

    match target {
        Target::Rom { region, offset } => {
            let id = env
                .memory
                .region_id(region)
                .ok_or_else(|| ConfigError::UnknownRomRegion {
                    context: format!("address space `{space}` entry `{}`", entry.name),
                    region: region.clone(),
                })?;
            let available = env.memory.region(id).len() as u64;
            let needed = u64::from(*offset) + span;
            if needed > available {
                return Err(out_of_range(region, needed, available));
            }
            Ok(Handler::Rom {
                region: id,
                base: *offset,
            })
        }
        Target::Ram => {
            let block = if let Some(block) = *ram {
                block
            } else {
                let block = env.memory.add_block(
                    &format!("{space}:{}", entry.name),
                    usize::try_from(span).unwrap_or(usize::MAX),
                    MemoryLayout::new(bus.endianness, bus.width),
                )?;
                *ram = Some(block);
                block
            };
            Ok(Handler::Block { block, xor: 0 })
        }
        Target::Share(share) => {
            let block = match env.memory.block_id(share) {
                Some(block) => block,
                None => env.memory.add_block(
                    share,
                    usize::try_from(span).unwrap_or(usize::MAX),
                    MemoryLayout::new(bus.endianness, bus.width),
                )?,
            };
            let backing = env.memory.block(block);
            let available = backing.len() as u64;
            if span > available {
                return Err(out_of_range(share, span, available));
            }
            Ok(Handler::Block {
                block,
                xor: backing.layout().swizzle_for(bus.endianness),
            })
        }
        Target::Bank(bank) | Target::BankSelect { bank, .. } => {
            let id = env
                .memory
                .bank_id(bank)
                .ok_or_else(|| ConfigError::UnknownBank {
                    space: space.to_owned(),
                    entry: entry.name.clone(),
                    bank: bank.clone(),
                })?;
            if let Target::BankSelect { shift, .. } = target {
                return Ok(Handler::BankSelect {
                    bank: id,
                    shift: *shift,
                });
            }
            let available = u64::from(env.memory.bank(id).page_size());
            if span > available {
                return Err(out_of_range(bank, span, available));
            }
            Ok(Handler::Bank { bank: id })
        }
        Target::Port(tag) => env
            .ports
            .port_id(tag)
            .map(Handler::Port)
            .ok_or_else(|| ConfigError::UnknownPort {
                space: space.to_owned(),
                entry: entry.name.clone(),
                port: tag.clone(),
            }),
        Target::Device(tag) => {
            let index = env
                .devices
                .iter()
                .position(|candidate| candidate == tag)
                .ok_or_else(|| ConfigError::UnknownDevice {
                    context: format!("address space `{space}` entry `{}`", entry.name),
                    tag: tag.clone(),
                })?;
            if env.owner == Some(index) {
                return Err(ConfigError::SelfMappedDevice {
                    space: space.to_owned(),
                    entry: entry.name.clone(),
                    tag: tag.clone(),
                });
            }
            Ok(Handler::Device(DeviceId(index)))
        }
        Target::Watchdog => {
            if env.has_watchdog {
                Ok(Handler::Watchdog)
            } else {
                Err(ConfigError::NoWatchdog {
                    space: space.to_owned(),
                    entry: entry.name.clone(),
                })
            }
        }
        Target::Nop => Ok(Handler::Nop),
    }
}

fn check_overlaps(
    space: &str,
    map: &AddressMap,
    bindings: &mut [Binding],
) -> Result<(), ConfigError> {
    bindings.sort_by_key(|binding| (binding.start, binding.entry));
    let mut active: Vec<Binding> = Vec::new();
    for binding in bindings.iter() {
        active.retain(|prior| prior.end >= binding.start);
        if let Some(prior) = active.iter().find(|prior| prior.lanes & binding.lanes != 0) {
            let (first, second) = if prior.entry <= binding.entry {
                (prior.entry, binding.entry)
            } else {
                (binding.entry, prior.entry)
            };
            return Err(ConfigError::Overlap {
                space: space.to_owned(),
                first: map.entries[first].name.clone(),
                second: map.entries[second].name.clone(),
                start: binding.start,
                end: binding.end.min(prior.end),
            });
        }
        active.push(*binding);
    }
    Ok(())
}
