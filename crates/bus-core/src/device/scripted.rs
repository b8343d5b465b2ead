//! Scripted bus master: a clocked device that replays a fixed program of bus
//! accesses. It stands in for processor cores when exercising a board's
//! interconnect without emulating an instruction set.
//!
//! Program syntax, one statement per line or separated by `;`, `#` starts a
//! comment, numbers are decimal or `0x` hex:
//!
//! ```text
//! r8 ADDR | r16 ADDR | r32 ADDR
//! w8 ADDR VALUE | w16 ADDR VALUE | w32 ADDR VALUE
//! idle CYCLES
//! wait        # until an interrupt is taken
//! halt
//! ```

use super::{fnv1a, Device, DeviceEvent, DeviceSetup, DeviceState, DeviceType, FNV_OFFSET};
use super::{OptionDecl, OptionKind, OutputLines, RomRequirement};
use crate::dispatch::{Bus, PROGRAM};
use crate::memory::AccessWidth;
use crate::{ConfigError, ScriptError, SnapshotError};

/// Cycles charged per bus access when not configured.
pub const DEFAULT_ACCESS_CYCLES: u64 = 4;

/// One statement of a master program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptOp {
    /// Read and fingerprint a value.
    Read {
        /// Address.
        addr: u32,
        /// Access width.
        width: AccessWidth,
    },
    /// Write a value.
    Write {
        /// Address.
        addr: u32,
        /// Access width.
        width: AccessWidth,
        /// Value, right-aligned.
        value: u32,
    },
    /// Spend cycles without touching the bus.
    Idle(u64),
    /// Stall until an interrupt is taken.
    Wait,
    /// Stop for good.
    Halt,
}

impl ScriptOp {
    /// Parses a program.
    ///
    /// # Errors
    ///
    /// Returns a [`ScriptError`] naming the first malformed statement.
    pub fn parse_program(text: &str) -> Result<Vec<Self>, ScriptError> {
        text.lines()
            .flat_map(|line| line.split(';'))
            .map(|statement| statement.split('#').next().unwrap_or_default().trim())
            .filter(|statement| !statement.is_empty())
            .enumerate()
            .map(|(index, statement)| {
                Self::parse_statement(statement).map_err(|message| ScriptError {
                    line: index + 1,
                    message,
                })
            })
            .collect()
    }

    fn parse_statement(statement: &str) -> Result<Self, String> {
        let mut words = statement.split_whitespace();
        let op = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let expect = |count: usize| {
            if args.len() == count {
                Ok(())
            } else {
                Err(format!("`{op}` takes {count} argument(s), found {}", args.len()))
            }
        };

        let width = match op.as_str() {
            "r8" | "w8" => Some(AccessWidth::Byte),
            "r16" | "w16" => Some(AccessWidth::Word),
            "r32" | "w32" => Some(AccessWidth::Long),
            _ => None,
        };
        match (op.as_str(), width) {
            (name, Some(width)) if name.starts_with('r') => {
                expect(1)?;
                Ok(Self::Read {
                    addr: parse_number(args[0])?,
                    width,
                })
            }
            (_, Some(width)) => {
                expect(2)?;
                let value = parse_number(args[1])?;
                if value & !width.value_mask() != 0 {
                    return Err(format!("value {value:#x} does not fit `{op}`"));
                }
                Ok(Self::Write {
                    addr: parse_number(args[0])?,
                    width,
                    value,
                })
            }
            ("idle", None) => {
                expect(1)?;
                match parse_number(args[0])? {
                    0 => Err("`idle` needs at least one cycle".to_owned()),
                    cycles => Ok(Self::Idle(u64::from(cycles))),
                }
            }
            ("wait", None) => expect(0).map(|()| Self::Wait),
            ("halt", None) => expect(0).map(|()| Self::Halt),
            _ => Err(format!("unknown operation `{op}`")),
        }
    }
}

fn parse_number(text: &str) -> Result<u32, String> {
    let cleaned = text.replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| format!("`{text}` is not a 32-bit number"))
}

const OPTIONS: &[OptionDecl] = &[
    OptionDecl {
        name: "program",
        kind: OptionKind::Text { choices: &[] },
        required: false,
    },
    OptionDecl {
        name: "loop",
        kind: OptionKind::Bool,
        required: false,
    },
    OptionDecl {
        name: "access-cycles",
        kind: OptionKind::Integer { min: 1, max: 1024 },
        required: false,
    },
];

/// Device replaying a [`ScriptOp`] program against its program space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedMaster {
    program: Vec<ScriptOp>,
    looping: bool,
    access_cycles: u64,
    pc: usize,
    idle: u64,
    halted: bool,
    irq_pending: bool,
    reads: u64,
    writes: u64,
    read_hash: u64,
    last_read: u32,
    interrupts: u64,
    last_interrupt: u8,
    input_lines: u64,
}

impl ScriptedMaster {
    /// Registry entry for this model.
    pub const DEVICE_TYPE: DeviceType = DeviceType {
        name: "scripted-master",
        options: OPTIONS,
        needs_clock: true,
        rom: RomRequirement::Optional,
        spaces: 1,
        factory: Self::create,
    };

    /// Creates a master running `program`.
    #[must_use]
    pub const fn new(program: Vec<ScriptOp>, looping: bool, access_cycles: u64) -> Self {
        Self {
            program,
            looping,
            access_cycles,
            pc: 0,
            idle: 0,
            halted: false,
            irq_pending: false,
            reads: 0,
            writes: 0,
            read_hash: FNV_OFFSET,
            last_read: 0,
            interrupts: 0,
            last_interrupt: 0,
            input_lines: 0,
        }
    }

    fn create(setup: &DeviceSetup<'_>) -> Result<Box<dyn Device>, ConfigError> {
        let program = ScriptOp::parse_program(setup.text("program").unwrap_or("halt"))
            .map_err(|err| setup.invalid("program", err.to_string()))?;
        let access_cycles = setup
            .integer("access-cycles")
            .map_or(Ok(DEFAULT_ACCESS_CYCLES), u64::try_from)
            .map_err(|_| setup.invalid("access-cycles", "must be positive".to_owned()))?;
        Ok(Box::new(Self::new(
            program,
            setup.flag("loop").unwrap_or(false),
            access_cycles,
        )))
    }

    /// Interrupts taken since reset.
    #[must_use]
    pub const fn interrupts(&self) -> u64 {
        self.interrupts
    }

    /// Fingerprint of every value read since reset.
    #[must_use]
    pub const fn read_hash(&self) -> u64 {
        self.read_hash
    }

    /// Returns `true` once the program has stopped.
    #[must_use]
    pub const fn halted(&self) -> bool {
        self.halted
    }

    fn record_read(&mut self, value: u32) {
        self.reads += 1;
        self.last_read = value;
        self.read_hash = value
            .to_be_bytes()
            .iter()
            .fold(self.read_hash, |hash, &byte| fnv1a(hash, byte));
    }
}

impl Device for ScriptedMaster {
    fn type_name(&self) -> &'static str {
        "scripted-master"
    }

    fn read(&mut self, _offset: u32, width: AccessWidth) -> u32 {
        self.last_read & width.value_mask()
    }

    fn write(&mut self, _offset: u32, _width: AccessWidth, _value: u32, _lines: &mut OutputLines) {}

    fn reset(&mut self) {
        *self = Self::new(
            std::mem::take(&mut self.program),
            self.looping,
            self.access_cycles,
        );
    }

    fn save_state(&self) -> DeviceState {
        let mut state = DeviceState::new();
        state.put_u64("pc", self.pc as u64);
        state.put_u64("idle", self.idle);
        state.put_bool("halted", self.halted);
        state.put_bool("irq_pending", self.irq_pending);
        state.put_u64("reads", self.reads);
        state.put_u64("writes", self.writes);
        state.put_u64("read_hash", self.read_hash);
        state.put_u64("last_read", u64::from(self.last_read));
        state.put_u64("interrupts", self.interrupts);
        state.put_u64("last_interrupt", u64::from(self.last_interrupt));
        state.put_u64("input_lines", self.input_lines);
        state
    }

    fn restore_state(&mut self, state: &DeviceState) -> Result<(), SnapshotError> {
        let pc = usize::try_from(state.u64("pc")?).unwrap_or(usize::MAX);
        if pc > self.program.len() {
            return Err(SnapshotError::FieldRange {
                field: "pc".to_owned(),
            });
        }
        let last_interrupt =
            u8::try_from(state.u64("last_interrupt")?).map_err(|_| SnapshotError::FieldRange {
                field: "last_interrupt".to_owned(),
            })?;
        self.pc = pc;
        self.idle = state.u64("idle")?;
        self.halted = state.bool("halted")?;
        self.irq_pending = state.bool("irq_pending")?;
        self.reads = state.u64("reads")?;
        self.writes = state.u64("writes")?;
        self.read_hash = state.u64("read_hash")?;
        self.last_read = state.u32("last_read")?;
        self.interrupts = state.u64("interrupts")?;
        self.last_interrupt = last_interrupt;
        self.input_lines = state.u64("input_lines")?;
        Ok(())
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn execute(&mut self, bus: &mut Bus<'_>, cycles: u64) -> u64 {
        let mut used = 0;
        while used < cycles {
            if self.halted {
                return cycles;
            }
            if self.idle > 0 {
                let step = self.idle.min(cycles - used);
                self.idle -= step;
                used += step;
                continue;
            }
            let Some(&op) = self.program.get(self.pc) else {
                if self.looping && !self.program.is_empty() {
                    self.pc = 0;
                } else {
                    self.halted = true;
                }
                continue;
            };
            match op {
                ScriptOp::Read { addr, width } => {
                    let value = bus.read(PROGRAM, addr, width);
                    self.record_read(value);
                    used += self.access_cycles;
                }
                ScriptOp::Write { addr, width, value } => {
                    bus.write(PROGRAM, addr, width, value);
                    self.writes += 1;
                    used += self.access_cycles;
                }
                ScriptOp::Idle(count) => self.idle = count,
                ScriptOp::Wait => {
                    if !self.irq_pending {
                        return cycles;
                    }
                    self.irq_pending = false;
                    used += 1;
                }
                ScriptOp::Halt => self.halted = true,
            }
            self.pc += 1;
        }
        used
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Interrupt { line } => {
                self.interrupts += 1;
                self.last_interrupt = line;
                self.irq_pending = true;
            }
            DeviceEvent::Line { line, state } => {
                let mask = 1_u64.checked_shl(u32::from(line)).unwrap_or(0);
                if state {
                    self.input_lines |= mask;
                } else {
                    self.input_lines &= !mask;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScriptOp, ScriptedMaster};
    use crate::device::{Device, DeviceEvent};
    use crate::memory::AccessWidth;

    #[test]
    fn program_text_parses_with_comments_and_separators() {
        let program = ScriptOp::parse_program(
            "w16 0x10800c 0 ; r8 0x700001 # dsw\n\n  idle 1_000\nwait\nhalt",
        )
        .expect("valid program");
        assert_eq!(
            program,
            vec![
                ScriptOp::Write {
                    addr: 0x10_800C,
                    width: AccessWidth::Word,
                    value: 0
                },
                ScriptOp::Read {
                    addr: 0x70_0001,
                    width: AccessWidth::Byte
                },
                ScriptOp::Idle(1000),
                ScriptOp::Wait,
                ScriptOp::Halt,
            ]
        );
    }

    #[test]
    fn malformed_statements_report_their_position() {
        let err = ScriptOp::parse_program("halt; jmp 0").expect_err("unknown op");
        assert_eq!(err.line, 2);
        assert!(ScriptOp::parse_program("w8 0 0x100").is_err());
        assert!(ScriptOp::parse_program("idle 0").is_err());
        assert!(ScriptOp::parse_program("r16").is_err());
        assert!(ScriptOp::parse_program("r16 banana").is_err());
    }

    #[test]
    fn interrupts_and_lines_are_recorded() {
        let mut master = ScriptedMaster::new(vec![ScriptOp::Wait], true, 4);
        master.handle_event(DeviceEvent::Interrupt { line: 6 });
        master.handle_event(DeviceEvent::Line { line: 3, state: true });
        let state = master.save_state();
        assert_eq!(state.u64("interrupts"), Ok(1));
        assert_eq!(state.u64("last_interrupt"), Ok(6));
        assert_eq!(state.u64("input_lines"), Ok(8));
        master.reset();
        assert_eq!(master.interrupts(), 0);
        master.restore_state(&state).expect("own state");
        assert_eq!(master.interrupts(), 1);
    }
}
