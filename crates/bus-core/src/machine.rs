//! Machine description, build-time validation and the run loop.
//!
//! [`MachineConfig`] is a plain declarative description. [`MachineConfig::build`]
//! loads ROMs, creates banks and shares, validates every device against its
//! type, resolves every address map and wires output lines; any problem is a
//! [`ConfigError`] and no [`Machine`] exists. The resulting [`Machine`] runs
//! devices quantum by quantum on one timeline.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace, warn};

use crate::device::{Device, DeviceEvent, DeviceId, DeviceSetup, DeviceSpec, DeviceState};
use crate::device::{DeviceTypeRegistry, LineChange};
use crate::dispatch::{AddressSpace, Bus, BusContext};
use crate::input::{InputPortSpec, InputPorts};
use crate::map::{resolve, ResolveEnv};
use crate::memory::{BankId, BankSpec, BlockId, MemoryBlock, MemoryLayout, MemoryStore};
use crate::rom::{load_rom_table, RomLoadOptions, RomReport, RomSource, RomTable};
use crate::scheduler::{PeriodicInterrupt, Scheduler, SchedulerConfig, Watchdog, WatchdogConfig};
use crate::snapshot::{MachineSnapshot, SnapshotVersion, WatchdogSnapshot};
use crate::{ConfigError, SnapshotError};

/// Coin slots tracked by [`Bookkeeping`].
pub const COIN_SLOTS: usize = 8;

/// Named RAM block mapped by more than one space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ShareSpec {
    /// Block name referenced by `Target::Share`.
    pub name: String,
    /// Size in bytes.
    pub size: usize,
    /// Storage byte order and unit.
    pub layout: MemoryLayout,
}

impl ShareSpec {
    /// Describes a share.
    #[must_use]
    pub fn new(name: &str, size: usize, layout: MemoryLayout) -> Self {
        Self {
            name: name.to_owned(),
            size,
            layout,
        }
    }
}

/// Consumer of a device output line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LineTarget {
    /// Coin lockout coil.
    CoinLockout {
        /// Coin slot, `0..COIN_SLOTS`.
        slot: u8,
        /// The lockout engages while the line is low.
        active_low: bool,
    },
    /// Electromechanical coin counter, advanced on each rising edge.
    CoinCounter {
        /// Coin slot, `0..COIN_SLOTS`.
        slot: u8,
    },
    /// Input line of another device, delivered as [`DeviceEvent::Line`].
    DeviceLine {
        /// Receiving device tag.
        device: String,
        /// Receiving line number.
        line: u8,
    },
    /// Output is not wired to anything.
    Unconnected,
}

/// Wiring of one device output line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LineRoute {
    /// Driving device tag.
    pub device: String,
    /// Output line number.
    pub line: u8,
    /// Consumer.
    pub target: LineTarget,
}

impl LineRoute {
    /// Describes a route.
    #[must_use]
    pub fn new(device: &str, line: u8, target: LineTarget) -> Self {
        Self {
            device: device.to_owned(),
            line,
            target,
        }
    }
}

/// Declarative machine description.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    /// Short machine name; snapshots are bound to it.
    pub name: String,
    /// Human-readable title.
    pub description: String,
    /// Device instances in scheduling order.
    pub devices: Vec<DeviceSpec>,
    /// ROM regions.
    pub roms: RomTable,
    /// Switchable windows onto ROM regions.
    pub banks: Vec<BankSpec>,
    /// Explicitly laid out shared blocks.
    pub shares: Vec<ShareSpec>,
    /// Input ports.
    pub ports: Vec<InputPortSpec>,
    /// Output-line wiring.
    pub routes: Vec<LineRoute>,
    /// Timeline parameters.
    pub scheduler: SchedulerConfig,
    /// Periodic interrupts.
    pub interrupts: Vec<PeriodicInterrupt>,
    /// Watchdog, when fitted.
    pub watchdog: Option<WatchdogConfig>,
}

impl MachineConfig {
    /// Creates an empty description with the default timeline.
    #[must_use]
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            devices: Vec::new(),
            roms: RomTable::new(),
            banks: Vec::new(),
            shares: Vec::new(),
            ports: Vec::new(),
            routes: Vec::new(),
            scheduler: SchedulerConfig::default(),
            interrupts: Vec::new(),
            watchdog: None,
        }
    }

    /// Builds the machine with the built-in device types.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; see [`MachineConfig::build_with`].
    pub fn build(
        &self,
        source: &dyn RomSource,
        options: &RomLoadOptions,
    ) -> Result<Machine, ConfigError> {
        self.build_with(&DeviceTypeRegistry::with_builtins(), source, options)
    }

    /// Builds the machine against `registry`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for duplicate names, an invalid timeline, ROM
    /// loading failures, bad bank or share geometry, an inconsistent input
    /// table, device validation failures, map resolution failures, and
    /// invalid line routes or interrupts.
    pub fn build_with(
        &self,
        registry: &DeviceTypeRegistry,
        source: &dyn RomSource,
        options: &RomLoadOptions,
    ) -> Result<Machine, ConfigError> {
        let tags: Vec<String> = self.devices.iter().map(|spec| spec.tag.clone()).collect();
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = tags.iter().find(|tag| !seen.insert(tag.as_str())) {
            return Err(ConfigError::DuplicateDevice {
                tag: duplicate.clone(),
            });
        }
        self.scheduler.validate()?;

        let loaded = load_rom_table(&self.roms, source, options)?;
        let mut memory = MemoryStore::new(loaded.regions);
        for bank in &self.banks {
            memory.add_bank(bank)?;
        }
        for share in &self.shares {
            memory.add_block(&share.name, share.size, share.layout)?;
        }
        let ports = InputPorts::new(self.ports.clone())?;

        let mut types = Vec::with_capacity(self.devices.len());
        for spec in &self.devices {
            types.push(*registry.validate(spec, &memory)?);
        }

        let watchdog = self
            .watchdog
            .map(|config| Watchdog::new(config, self.scheduler.quanta_per_frame))
            .transpose()?;

        let mut spaces = Vec::new();
        let mut owned = Vec::with_capacity(self.devices.len());
        for (index, spec) in self.devices.iter().enumerate() {
            let mut own = Vec::with_capacity(spec.maps.len());
            for map in &spec.maps {
                let mut env = ResolveEnv {
                    memory: &mut memory,
                    ports: &ports,
                    devices: &tags,
                    owner: Some(index),
                    has_watchdog: watchdog.is_some(),
                };
                own.push(spaces.len());
                spaces.push(resolve(&format!("{}:{}", spec.tag, map.name), map, &mut env)?);
            }
            owned.push(own);
        }

        let mut devices: Vec<Option<Box<dyn Device>>> = Vec::with_capacity(self.devices.len());
        for (spec, device_type) in self.devices.iter().zip(&types) {
            let rom = spec
                .rom_region
                .as_deref()
                .and_then(|region| memory.region_id(region))
                .map(|id| memory.region(id).as_bytes());
            let setup = DeviceSetup {
                tag: &spec.tag,
                clock: spec.clock,
                options: &spec.options,
                rom,
            };
            devices.push(Some((device_type.factory)(&setup)?));
        }

        let routes = self.resolve_routes(&tags)?;

        let clocks: Vec<u64> = self.devices.iter().map(|spec| spec.clock).collect();
        let mut scheduler = Scheduler::new(self.scheduler, &clocks);
        for interrupt in &self.interrupts {
            let device = position(&tags, &interrupt.device, "periodic interrupt")?;
            let invalid = |reason: &str| ConfigError::InvalidInterrupt {
                device: interrupt.device.clone(),
                reason: reason.to_owned(),
            };
            if interrupt.quantum >= self.scheduler.quanta_per_frame {
                return Err(invalid("quantum lies outside the frame"));
            }
            if !devices[device].as_ref().is_some_and(|device| device.is_executable()) {
                return Err(invalid("device does not execute"));
            }
            scheduler.add_periodic(device, interrupt.line, interrupt.quantum);
        }

        info!(
            machine = %self.name,
            devices = devices.len(),
            spaces = spaces.len(),
            "machine built"
        );
        let mut machine = Machine {
            name: self.name.clone(),
            description: self.description.clone(),
            tags,
            devices,
            spaces,
            owned,
            memory,
            ports,
            scheduler,
            watchdog,
            routes,
            bookkeeping: Bookkeeping::default(),
            pending_lines: Vec::new(),
            watchdog_resets: 0,
            rom_report: loaded.report,
        };
        machine.settle_lines();
        Ok(machine)
    }

    fn resolve_routes(&self, tags: &[String]) -> Result<BTreeMap<(usize, u8), Route>, ConfigError> {
        let mut routes = BTreeMap::new();
        for route in &self.routes {
            let device = position(tags, &route.device, "line route")?;
            let invalid = |reason: String| ConfigError::InvalidRoute {
                device: route.device.clone(),
                line: route.line,
                reason,
            };
            let slot_of = |slot: u8| {
                let index = usize::from(slot);
                if index < COIN_SLOTS {
                    Ok(index)
                } else {
                    Err(invalid(format!("coin slot {slot} does not exist")))
                }
            };
            let resolved = match &route.target {
                LineTarget::CoinLockout { slot, active_low } => Route::CoinLockout {
                    slot: slot_of(*slot)?,
                    active_low: *active_low,
                },
                LineTarget::CoinCounter { slot } => Route::CoinCounter {
                    slot: slot_of(*slot)?,
                },
                LineTarget::DeviceLine { device: target, line } => Route::Device {
                    device: position(tags, target, "line route")?,
                    line: *line,
                },
                LineTarget::Unconnected => Route::Unconnected,
            };
            if routes.insert((device, route.line), resolved).is_some() {
                return Err(invalid("line is routed twice".to_owned()));
            }
        }
        Ok(routes)
    }
}

fn position(tags: &[String], tag: &str, context: &str) -> Result<usize, ConfigError> {
    tags.iter()
        .position(|candidate| candidate == tag)
        .ok_or_else(|| ConfigError::UnknownDevice {
            context: context.to_owned(),
            tag: tag.to_owned(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    CoinLockout { slot: usize, active_low: bool },
    CoinCounter { slot: usize },
    Device { device: usize, line: u8 },
    Unconnected,
}

/// Coin counters and lockouts driven by routed output lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Bookkeeping {
    /// Counts per coin slot.
    pub coin_counters: [u32; COIN_SLOTS],
    /// Whether each slot's lockout is engaged.
    pub lockouts: [bool; COIN_SLOTS],
    /// Current level of each counter's drive line.
    pub counter_lines: [bool; COIN_SLOTS],
}

/// A built machine: devices, resolved spaces, memory and timeline.
#[derive(Debug)]
pub struct Machine {
    name: String,
    description: String,
    tags: Vec<String>,
    devices: Vec<Option<Box<dyn Device>>>,
    spaces: Vec<AddressSpace>,
    owned: Vec<Vec<usize>>,
    memory: MemoryStore,
    ports: InputPorts,
    scheduler: Scheduler,
    watchdog: Option<Watchdog>,
    routes: BTreeMap<(usize, u8), Route>,
    bookkeeping: Bookkeeping,
    pending_lines: Vec<(DeviceId, LineChange)>,
    watchdog_resets: u64,
    rom_report: RomReport,
}

impl Machine {
    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable title.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Device tags in scheduling order.
    #[must_use]
    pub fn device_tags(&self) -> &[String] {
        &self.tags
    }

    /// Resolved address spaces.
    #[must_use]
    pub fn spaces(&self) -> &[AddressSpace] {
        &self.spaces
    }

    /// Looks up a resolved space by `<tag>:<map>` name.
    #[must_use]
    pub fn space(&self, name: &str) -> Option<&AddressSpace> {
        self.spaces.iter().find(|space| space.name() == name)
    }

    /// Timeline.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Watchdog, when fitted.
    #[must_use]
    pub const fn watchdog(&self) -> Option<&Watchdog> {
        self.watchdog.as_ref()
    }

    /// Resets triggered by watchdog expiry.
    #[must_use]
    pub const fn watchdog_resets(&self) -> u64 {
        self.watchdog_resets
    }

    /// Integrity report of the ROM load.
    #[must_use]
    pub const fn rom_report(&self) -> &RomReport {
        &self.rom_report
    }

    /// Coin counters and lockouts.
    #[must_use]
    pub const fn bookkeeping(&self) -> &Bookkeeping {
        &self.bookkeeping
    }

    /// Input ports.
    #[must_use]
    pub const fn inputs(&self) -> &InputPorts {
        &self.ports
    }

    /// Input ports, for the host to drive.
    pub fn inputs_mut(&mut self) -> &mut InputPorts {
        &mut self.ports
    }

    /// ROM region contents.
    #[must_use]
    pub fn region(&self, name: &str) -> Option<&[u8]> {
        self.memory
            .region_id(name)
            .map(|id| self.memory.region(id).as_bytes())
    }

    /// RAM or share block.
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&MemoryBlock> {
        self.memory.block_id(name).map(|id| self.memory.block(id))
    }

    /// Selected page of a bank.
    #[must_use]
    pub fn bank_index(&self, name: &str) -> Option<u32> {
        self.memory
            .bank_id(name)
            .map(|id| self.memory.bank(id).current())
    }

    /// Captured state of one device.
    #[must_use]
    pub fn device_state(&self, tag: &str) -> Option<DeviceState> {
        let index = self.tags.iter().position(|candidate| candidate == tag)?;
        self.devices[index].as_ref().map(|device| device.save_state())
    }

    /// Bus view of device `tag`'s spaces for host-side pokes and peeks.
    ///
    /// Writes through it have the same side effects as device writes; line
    /// changes are routed at the next quantum.
    pub fn host_bus(&mut self, tag: &str) -> Option<Bus<'_>> {
        let index = self.tags.iter().position(|candidate| candidate == tag)?;
        let ctx = BusContext {
            memory: &mut self.memory,
            devices: &mut self.devices,
            ports: &self.ports,
            watchdog: &mut self.watchdog,
            lines: &mut self.pending_lines,
        };
        Some(Bus::new(&mut self.spaces, &self.owned[index], ctx))
    }

    /// Runs one quantum: every executable device gets the cycles it is owed.
    pub fn run_quantum(&mut self) {
        self.route_lines();
        self.scheduler.begin_quantum();
        for index in 0..self.devices.len() {
            let Some(mut device) = self.devices[index].take() else {
                continue;
            };
            for event in self.scheduler.take_events(index) {
                device.handle_event(event);
            }
            if device.is_executable() {
                let budget = self.scheduler.budget(index);
                let consumed = if budget == 0 {
                    0
                } else {
                    let ctx = BusContext {
                        memory: &mut self.memory,
                        devices: &mut self.devices,
                        ports: &self.ports,
                        watchdog: &mut self.watchdog,
                        lines: &mut self.pending_lines,
                    };
                    let mut bus = Bus::new(&mut self.spaces, &self.owned[index], ctx);
                    device.execute(&mut bus, budget)
                };
                self.scheduler.charge(index, consumed, budget);
            }
            self.devices[index] = Some(device);
            self.route_lines();
        }

        let expired = self.watchdog.as_mut().is_some_and(Watchdog::tick);
        self.scheduler.end_quantum();
        if expired {
            self.watchdog_resets += 1;
            warn!(
                machine = %self.name,
                quantum = self.scheduler.quantum(),
                resets = self.watchdog_resets,
                "watchdog expired, resetting devices"
            );
            self.reset_devices();
        }
    }

    /// Runs one frame.
    pub fn run_frame(&mut self) {
        for _ in 0..self.scheduler.config().quanta_per_frame {
            self.run_quantum();
        }
    }

    /// Runs `frames` frames.
    pub fn run_frames(&mut self, frames: u64) {
        for _ in 0..frames {
            self.run_frame();
        }
        debug!(machine = %self.name, frame = self.scheduler.frame(), "frames completed");
    }

    /// Resets every device and bank, drops pending events and kicks the
    /// watchdog. RAM contents and the timeline are kept.
    pub fn reset(&mut self) {
        for id in 0..self.memory.banks().count() {
            self.memory.bank_mut(BankId(id)).reset();
        }
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.service();
        }
        self.reset_devices();
        info!(machine = %self.name, "machine reset");
    }

    fn reset_devices(&mut self) {
        for device in self.devices.iter_mut().flatten() {
            device.reset();
        }
        self.scheduler.clear_events();
        self.pending_lines.clear();
        self.settle_lines();
    }

    /// Drives every bookkeeping route from a low line.
    fn settle_lines(&mut self) {
        let settled: Vec<(usize, u8)> = self
            .routes
            .iter()
            .filter(|(_, route)| !matches!(route, Route::Device { .. }))
            .map(|(&key, _)| key)
            .collect();
        for (device, line) in settled {
            self.apply_line(device, LineChange { line, state: false });
        }
    }

    fn route_lines(&mut self) {
        let pending = std::mem::take(&mut self.pending_lines);
        for (DeviceId(device), change) in pending {
            self.apply_line(device, change);
        }
    }

    fn apply_line(&mut self, device: usize, change: LineChange) {
        let LineChange { line, state } = change;
        match self.routes.get(&(device, line)).copied() {
            Some(Route::CoinLockout { slot, active_low }) => {
                self.bookkeeping.lockouts[slot] = state != active_low;
            }
            Some(Route::CoinCounter { slot }) => {
                if state && !self.bookkeeping.counter_lines[slot] {
                    self.bookkeeping.coin_counters[slot] =
                        self.bookkeeping.coin_counters[slot].wrapping_add(1);
                }
                self.bookkeeping.counter_lines[slot] = state;
            }
            Some(Route::Device { device, line }) => {
                self.scheduler.post(device, DeviceEvent::Line { line, state });
            }
            Some(Route::Unconnected) | None => {
                trace!(device = %self.tags[device], line, state, "output line not connected");
            }
        }
    }

    /// Captures the complete machine state.
    #[must_use]
    pub fn save_state(&self) -> MachineSnapshot {
        MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            machine: self.name.clone(),
            quantum: self.scheduler.quantum(),
            executed: self
                .tags
                .iter()
                .enumerate()
                .map(|(index, tag)| (tag.clone(), self.scheduler.executed(index)))
                .collect(),
            events: self
                .tags
                .iter()
                .enumerate()
                .map(|(index, tag)| (tag.clone(), self.scheduler.pending(index)))
                .collect(),
            watchdog: self.watchdog.as_ref().map(|watchdog| WatchdogSnapshot {
                counter: watchdog.counter(),
                expirations: watchdog.expirations(),
            }),
            watchdog_resets: self.watchdog_resets,
            blocks: self
                .memory
                .blocks()
                .map(|block| (block.name().to_owned(), block.as_bytes().to_vec()))
                .collect(),
            banks: self
                .memory
                .banks()
                .map(|bank| (bank.name().to_owned(), bank.current()))
                .collect(),
            devices: self
                .tags
                .iter()
                .zip(&self.devices)
                .filter_map(|(tag, device)| {
                    device.as_ref().map(|device| (tag.clone(), device.save_state()))
                })
                .collect(),
            bus_values: self
                .spaces
                .iter()
                .map(|space| (space.name().to_owned(), space.last_value()))
                .collect(),
            inputs: self.ports.live_levels(),
            bookkeeping: self.bookkeeping,
        }
    }

    /// Restores a snapshot taken from a machine built from the same description.
    ///
    /// Every section is validated before anything changes; a device that
    /// rejects its record rolls all devices back.
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] when the snapshot belongs to another
    /// machine, lacks an entry, or carries out-of-range values.
    pub fn restore_state(&mut self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        self.check_snapshot(snapshot)?;

        let previous: Vec<Option<DeviceState>> = self
            .devices
            .iter()
            .map(|device| device.as_ref().map(|device| device.save_state()))
            .collect();
        for index in 0..self.devices.len() {
            let restored = match (
                self.devices[index].as_mut(),
                snapshot.devices.get(&self.tags[index]),
            ) {
                (Some(device), Some(state)) => device.restore_state(state),
                _ => Ok(()),
            };
            if let Err(source) = restored {
                self.roll_back(&previous);
                return Err(SnapshotError::Device {
                    tag: self.tags[index].clone(),
                    source: Box::new(source),
                });
            }
        }

        let executed: Vec<u64> = self.tags.iter().map(|tag| snapshot.executed[tag]).collect();
        let events: Vec<Vec<DeviceEvent>> = self
            .tags
            .iter()
            .map(|tag| snapshot.events[tag].clone())
            .collect();
        self.scheduler.restore(snapshot.quantum, &executed, events);
        if let (Some(watchdog), Some(saved)) = (self.watchdog.as_mut(), snapshot.watchdog) {
            watchdog.restore(saved.counter, saved.expirations);
        }
        self.watchdog_resets = snapshot.watchdog_resets;

        for id in 0..self.memory.blocks().count() {
            let block = self.memory.block_mut(BlockId(id));
            let saved = &snapshot.blocks[block.name()];
            block.as_bytes_mut().copy_from_slice(saved);
        }
        for id in 0..self.memory.banks().count() {
            let bank = self.memory.bank_mut(BankId(id));
            let index = snapshot.banks[bank.name()];
            bank.restore(index)?;
        }
        for space in &mut self.spaces {
            space.set_last_value(snapshot.bus_values[space.name()]);
        }
        self.ports.apply_levels(&snapshot.inputs);
        self.bookkeeping = snapshot.bookkeeping;
        self.pending_lines.clear();
        info!(machine = %self.name, quantum = snapshot.quantum, "snapshot restored");
        Ok(())
    }

    fn check_snapshot(&self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        if snapshot.machine != self.name {
            return Err(SnapshotError::MachineMismatch {
                expected: self.name.clone(),
                found: snapshot.machine.clone(),
            });
        }
        let missing = |kind: &'static str, name: &str| SnapshotError::Missing {
            kind,
            name: name.to_owned(),
        };
        for tag in &self.tags {
            if !snapshot.executed.contains_key(tag) || !snapshot.events.contains_key(tag) {
                return Err(missing("scheduler entry", tag));
            }
        }
        for (tag, device) in self.tags.iter().zip(&self.devices) {
            if device.is_some() && !snapshot.devices.contains_key(tag) {
                return Err(missing("device", tag));
            }
        }
        for block in self.memory.blocks() {
            let saved = snapshot
                .blocks
                .get(block.name())
                .ok_or_else(|| missing("block", block.name()))?;
            if saved.len() != block.len() {
                return Err(SnapshotError::BlockSizeMismatch {
                    name: block.name().to_owned(),
                    expected: block.len(),
                    found: saved.len(),
                });
            }
        }
        for bank in self.memory.banks() {
            let index = *snapshot
                .banks
                .get(bank.name())
                .ok_or_else(|| missing("bank", bank.name()))?;
            if index >= bank.entries() {
                return Err(SnapshotError::BankOutOfRange {
                    name: bank.name().to_owned(),
                    index,
                    entries: bank.entries(),
                });
            }
        }
        for space in &self.spaces {
            if !snapshot.bus_values.contains_key(space.name()) {
                return Err(missing("address space", space.name()));
            }
        }
        if let Some(watchdog) = &self.watchdog {
            let saved = snapshot
                .watchdog
                .ok_or_else(|| missing("watchdog", "watchdog"))?;
            if saved.counter >= watchdog.interval() {
                return Err(SnapshotError::FieldRange {
                    field: "watchdog.counter".to_owned(),
                });
            }
        }
        self.ports.check_levels(&snapshot.inputs)
    }

    fn roll_back(&mut self, previous: &[Option<DeviceState>]) {
        for ((tag, device), state) in self.tags.iter().zip(&mut self.devices).zip(previous) {
            if let (Some(device), Some(state)) = (device.as_mut(), state) {
                if let Err(err) = device.restore_state(state) {
                    warn!(device = %tag, error = %err, "device rejected its own state during rollback");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LineRoute, LineTarget, MachineConfig, ShareSpec};
    use crate::device::{DeviceSpec, OptionValue};
    use crate::map::{AddressMap, BusConfig, UnmappedRead};
    use crate::memory::{AccessWidth, Endianness, MemoryLayout};
    use crate::rom::{MemorySource, RomLoadOptions};
    use crate::scheduler::{PeriodicInterrupt, WatchdogConfig};
    use crate::{ConfigError, SnapshotError};

    fn bus() -> BusConfig {
        BusConfig::new(AccessWidth::Word, Endianness::Big, 16, UnmappedRead::AllOnes)
    }

    fn master(tag: &str, program: &str) -> DeviceSpec {
        let mut map = AddressMap::new("program", bus());
        map.range(0x0000, 0x0fff).name("ram").share("common");
        map.range(0x2000, 0x2001)
            .name("latch")
            .lanes(0x00ff)
            .select(0x0070)
            .write_device("latch");
        DeviceSpec::new(tag, "scripted-master", 1_000_000)
            .with_option("program", OptionValue::Text(program.to_owned()))
            .with_map(map)
    }

    fn config(program: &str) -> MachineConfig {
        let mut config = MachineConfig::new("mini", "two-master test rig");
        config.devices.push(master("cpu", program));
        config.devices.push(DeviceSpec::new("latch", "addressable-latch", 0));
        config
            .shares
            .push(ShareSpec::new("common", 0x1000, MemoryLayout::new(Endianness::Big, AccessWidth::Word)));
        config.routes.push(LineRoute::new(
            "latch",
            2,
            LineTarget::CoinCounter { slot: 0 },
        ));
        config
    }

    fn build(config: &MachineConfig) -> Result<super::Machine, ConfigError> {
        config.build(&MemorySource::new(), &RomLoadOptions::default())
    }

    #[test]
    fn latch_output_drives_coin_counter_on_rising_edges() {
        let machine_config = config("w8 0x2021 1; w8 0x2021 0; w8 0x2021 1; halt");
        let mut machine = build(&machine_config).expect("valid machine");
        machine.run_frames(1);
        assert_eq!(machine.bookkeeping().coin_counters[0], 2);
        assert!(machine.bookkeeping().counter_lines[0]);
    }

    #[test]
    fn duplicate_tags_and_bad_routes_are_rejected() {
        let mut duplicate = config("halt");
        duplicate.devices.push(DeviceSpec::new("latch", "addressable-latch", 0));
        assert!(matches!(build(&duplicate), Err(ConfigError::DuplicateDevice { .. })));

        let mut bad_slot = config("halt");
        bad_slot.routes.push(LineRoute::new("latch", 3, LineTarget::CoinCounter { slot: 8 }));
        assert!(matches!(build(&bad_slot), Err(ConfigError::InvalidRoute { .. })));

        let mut twice = config("halt");
        twice.routes.push(LineRoute::new("latch", 2, LineTarget::Unconnected));
        assert!(matches!(build(&twice), Err(ConfigError::InvalidRoute { .. })));

        let mut unknown = config("halt");
        unknown.routes.push(LineRoute::new("sound", 0, LineTarget::Unconnected));
        assert!(matches!(build(&unknown), Err(ConfigError::UnknownDevice { .. })));
    }

    #[test]
    fn interrupts_must_target_executing_devices_inside_the_frame() {
        let mut to_latch = config("halt");
        to_latch.interrupts.push(PeriodicInterrupt {
            device: "latch".to_owned(),
            line: 1,
            quantum: 0,
        });
        assert!(matches!(build(&to_latch), Err(ConfigError::InvalidInterrupt { .. })));

        let mut late = config("halt");
        late.interrupts.push(PeriodicInterrupt {
            device: "cpu".to_owned(),
            line: 1,
            quantum: 10,
        });
        assert!(matches!(build(&late), Err(ConfigError::InvalidInterrupt { .. })));
    }

    #[test]
    fn watchdog_reset_reboots_devices_but_keeps_memory() {
        let mut machine_config = config("w16 0x0000 0x1234; idle 1000000");
        machine_config.watchdog = Some(WatchdogConfig { interval_frames: 1 });
        let mut machine = build(&machine_config).expect("valid machine");
        machine.run_frame();
        assert_eq!(machine.watchdog_resets(), 1);
        assert_eq!(machine.block("common").map(|block| block.as_bytes()[..2].to_vec()), Some(vec![0x12, 0x34]));
        assert_eq!(
            machine.device_state("cpu").map(|state| state.u64("writes")),
            Some(Ok(0))
        );
    }

    #[test]
    fn snapshot_for_another_machine_is_rejected_without_changes() {
        let machine_config = config("w16 0x0010 0xbeef; halt");
        let mut machine = build(&machine_config).expect("valid machine");
        machine.run_frame();
        let mut snapshot = machine.save_state();
        snapshot.machine = "other".to_owned();
        assert!(matches!(
            machine.restore_state(&snapshot),
            Err(SnapshotError::MachineMismatch { .. })
        ));

        let mut truncated = machine.save_state();
        truncated.blocks.insert("common".to_owned(), vec![0; 2]);
        assert!(matches!(
            machine.restore_state(&truncated),
            Err(SnapshotError::BlockSizeMismatch { .. })
        ));
        assert_eq!(machine.block("common").map(|block| block.as_bytes()[0x10]), Some(0xbe));
    }

    #[test]
    fn host_bus_reaches_the_device_spaces() {
        let mut machine = build(&config("halt")).expect("valid machine");
        let mut bus = machine.host_bus("cpu").expect("known device");
        bus.write16(0x0100, 0xcafe);
        assert_eq!(bus.read8(0x0101), 0xfe);
        assert_eq!(bus.read16(0x3000), 0xffff);
        assert!(machine.host_bus("nobody").is_none());
    }
}
