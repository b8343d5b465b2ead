//! Subcommand implementations. Each writes its report to `out` so the
//! binary and the unit tests share one code path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use bus_core::{
    boards, DirectorySource, FieldKind, IntegrityPolicy, Machine, MachineConfig,
    MachineSnapshot, MemorySource, RomDigest, RomLoadOptions, RomSource, BOARDS,
};
use tracing::{info, warn};

/// `PORT:NAME=SETTING` from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DipAssignment {
    pub port: String,
    pub name: String,
    pub setting: String,
}

impl FromStr for DipAssignment {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (port, rest) = text
            .split_once(':')
            .ok_or_else(|| format!("`{text}` is not PORT:NAME=SETTING"))?;
        let (name, setting) = rest
            .split_once('=')
            .ok_or_else(|| format!("`{text}` is missing `=SETTING`"))?;
        if port.is_empty() || name.is_empty() || setting.is_empty() {
            return Err(format!("`{text}` has an empty part"));
        }
        Ok(Self {
            port: port.to_owned(),
            name: name.to_owned(),
            setting: setting.to_owned(),
        })
    }
}

/// Where `run` takes its images from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RomInput {
    Directory(PathBuf),
    Blank,
}

/// Everything `run` needs.
#[derive(Debug)]
pub struct RunOptions {
    pub board: String,
    pub roms: RomInput,
    pub degraded: bool,
    pub frames: u64,
    pub dips: Vec<DipAssignment>,
    pub load: Option<PathBuf>,
    pub save: Option<PathBuf>,
}

fn board_config(name: &str) -> Result<MachineConfig> {
    boards::lookup(name).ok_or_else(|| {
        let known: Vec<_> = BOARDS.iter().map(|board| board.name).collect();
        anyhow!("unknown board `{name}` (known: {})", known.join(", "))
    })
}

pub fn list_boards(out: &mut impl Write) -> Result<()> {
    for board in BOARDS {
        let parent = board
            .parent
            .map_or_else(String::new, |parent| format!(" [clone of {parent}]"));
        writeln!(
            out,
            "{:<10} {} {:<10} {}{parent}",
            board.name, board.year, board.manufacturer, board.description
        )?;
    }
    Ok(())
}

/// Prints one line per image and returns whether the set is complete and good.
pub fn verify(board: &str, rom_dir: &Path, out: &mut impl Write) -> Result<bool> {
    let config = board_config(board)?;
    let source = DirectorySource::new(rom_dir);
    let mut clean = true;
    for (region, file) in config.roms.files() {
        let expected = file.expected_digest()?;
        let verdict = match source.fetch(file)? {
            None if file.best_effort => "missing (optional)".to_owned(),
            None => {
                clean = false;
                "MISSING".to_owned()
            }
            Some(image) if image.len() != file.length => {
                clean = false;
                format!("WRONG SIZE {:#x}, expected {:#x}", image.len(), file.length)
            }
            Some(image) => {
                let actual = RomDigest::of(&image);
                if actual == expected {
                    "ok".to_owned()
                } else {
                    if !file.best_effort {
                        clean = false;
                    }
                    format!("BAD CHECKSUM {actual:?}, expected {expected:?}")
                }
            }
        };
        writeln!(out, "{region:<14} {:<14} {verdict}", file.name)?;
    }
    writeln!(
        out,
        "{board}: {}",
        if clean { "romset is good" } else { "romset has problems" }
    )?;
    Ok(clean)
}

pub fn ports(board: &str, out: &mut impl Write) -> Result<()> {
    let config = board_config(board)?;
    for port in &config.ports {
        writeln!(out, "{}", port.tag)?;
        for field in &port.fields {
            match &field.kind {
                FieldKind::Dip { name, settings } => {
                    writeln!(out, "  {:#06x} dip {name}", field.mask)?;
                    for setting in settings {
                        let marker = if setting.value == field.default { '*' } else { ' ' };
                        writeln!(out, "         {marker} {:#06x} {}", setting.value, setting.label)?;
                    }
                }
                FieldKind::Digital { .. } => {
                    let level = if field.active_low { "active low" } else { "active high" };
                    writeln!(out, "  {:#06x} {} ({level})", field.mask, field.label())?;
                }
                FieldKind::Unused => {
                    writeln!(out, "  {:#06x} unused = {:#x}", field.mask, field.default)?;
                }
            }
        }
    }
    Ok(())
}

fn build(options: &RunOptions, config: &MachineConfig) -> Result<Machine> {
    let load = RomLoadOptions {
        policy: if options.degraded {
            IntegrityPolicy::Degraded
        } else {
            IntegrityPolicy::Strict
        },
    };
    let machine = match &options.roms {
        RomInput::Directory(dir) => config.build(&DirectorySource::new(dir), &load),
        RomInput::Blank => config.build(&MemorySource::blank_for(&config.roms, 0x00), &load),
    }
    .with_context(|| format!("building {}", config.name))?;
    for problem in machine.rom_report().problems() {
        warn!(
            region = %problem.region,
            file = %problem.file,
            status = ?problem.status,
            "rom image problem"
        );
    }
    Ok(machine)
}

fn read_snapshot(path: &Path) -> Result<MachineSnapshot> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing snapshot {}", path.display()))
}

fn write_snapshot(path: &Path, snapshot: &MachineSnapshot) -> Result<()> {
    let text = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, text).with_context(|| format!("writing snapshot {}", path.display()))
}

pub fn run(options: RunOptions, out: &mut impl Write) -> Result<()> {
    let config = board_config(&options.board)?;
    let mut machine = build(&options, &config)?;

    if let Some(path) = &options.load {
        let snapshot = read_snapshot(path)?;
        machine
            .restore_state(&snapshot)
            .with_context(|| format!("restoring {}", path.display()))?;
        info!(quantum = snapshot.quantum, "snapshot restored");
    }
    for dip in &options.dips {
        machine
            .inputs_mut()
            .set_dip(&dip.port, &dip.name, &dip.setting)
            .with_context(|| format!("setting {}:{}", dip.port, dip.name))?;
    }

    machine.run_frames(options.frames);
    let snapshot = machine.save_state();
    if machine.watchdog_resets() > 0 {
        warn!(resets = machine.watchdog_resets(), "watchdog reset the machine");
    }

    let bookkeeping = machine.bookkeeping();
    writeln!(out, "board           {}", machine.name())?;
    writeln!(out, "frame           {}", machine.scheduler().frame())?;
    writeln!(out, "watchdog resets {}", machine.watchdog_resets())?;
    writeln!(out, "coin counters   {:?}", bookkeeping.coin_counters)?;
    writeln!(out, "coin lockouts   {:?}", bookkeeping.lockouts)?;
    writeln!(out, "fingerprint     {:016x}", snapshot.fingerprint())?;

    if let Some(path) = &options.save {
        write_snapshot(path, &snapshot)?;
        info!(path = %path.display(), "snapshot saved");
    }
    Ok(())
}
