//! Gaelco REF.940411 PCB: "TH Strikes Back" (Thunder Hoop II), 1994.
//!
//! A 68000 main CPU shares 32 KiB of RAM with a DS5002FP protection MCU and
//! drives an LS259 output latch (coin lockouts and counters) and an MSM6295
//! whose upper 64 KiB of sample space is bank switched. Both CPUs are
//! scripted masters here; their default programs exercise the same bus
//! traffic pattern the game produces.

use crate::device::{DeviceSpec, OptionValue};
use crate::input::{InputPortSpec, InputType};
use crate::machine::{LineRoute, LineTarget, MachineConfig, ShareSpec};
use crate::map::{AddressMap, BusConfig, UnmappedRead};
use crate::memory::{AccessWidth, BankPolicy, BankSpec, Endianness, MemoryLayout};
use crate::rom::{RomFileSpec, RomRegionSpec, RomTable};
use crate::scheduler::{PeriodicInterrupt, RefreshRate, SchedulerConfig, WatchdogConfig};

/// 68000 clock: 24 MHz crystal divided by two.
pub const MAIN_CLOCK: u64 = 24_000_000 / 2;
/// DS5002FP clock.
pub const MCU_CLOCK: u64 = 24_000_000 / 2;
/// MSM6295 clock.
pub const OKI_CLOCK: u64 = 1_000_000;
/// Vertical refresh in hundredths of a hertz.
pub const REFRESH_CENTIHERTZ: u64 = 5924;
/// Interrupt level raised on the 68000 at vblank.
pub const VBLANK_LEVEL: u8 = 6;
/// Frames the game may go without kicking the watchdog.
pub const WATCHDOG_FRAMES: u32 = 8;

/// Main-CPU loop: sync to vblank, kick the watchdog, poll the controls, post
/// a command for the MCU and program the sound bank.
pub const MAIN_PROGRAM: &str = "\
wait
w16 0x10800c 0
r16 0x700004
r16 0x700006
r16 0x700008
w16 0xfe8000 0x0101
r16 0xfe8002
w16 0x70000c 0x0003
r16 0x70000e";

/// MCU loop: pick up the host command and acknowledge it.
pub const MCU_PROGRAM: &str = "\
r8 0x8000
r8 0x8001
w8 0x8002 0x5a
w8 0x8003 0xa5
idle 2000";

/// ROM set revisions sharing this hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Thoop2Variant {
    /// Program checksum 020E0867.
    Thoop2,
    /// Program checksum 020EB356.
    Thoop2a,
}

impl Thoop2Variant {
    /// Every revision, parent first.
    pub const ALL: [Self; 2] = [Self::Thoop2, Self::Thoop2a];

    /// Short set name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Thoop2 => "thoop2",
            Self::Thoop2a => "thoop2a",
        }
    }

    /// Full title.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Thoop2 => {
                "TH Strikes Back (Non North America, Version 1.0, Checksum 020E0867)"
            }
            Self::Thoop2a => {
                "TH Strikes Back (Non North America, Version 1.0, Checksum 020EB356)"
            }
        }
    }

    /// Looks a revision up by its short name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|variant| variant.name() == name)
    }

    fn program_roms(self) -> [RomFileSpec; 2] {
        match self {
            Self::Thoop2 => [
                RomFileSpec::new(
                    "th2c23.c23",
                    0x00_0000,
                    0x8_0000,
                    0x3e46_5753,
                    "1ea1173b9fe5d652e7b5fafb822e2535cecbc198",
                ),
                RomFileSpec::new(
                    "th2c22.c22",
                    0x00_0001,
                    0x8_0000,
                    0x8372_05b7,
                    "f78b90c2be0b4dddaba26f074ea00eff863cfdb2",
                ),
            ],
            Self::Thoop2a => [
                RomFileSpec::new(
                    "3.c23",
                    0x00_0000,
                    0x8_0000,
                    0x6cd4_a8dc,
                    "7d0cdce64b390c3f9769b07d57cf1eee1e6a7bf5",
                ),
                RomFileSpec::new(
                    "2.c22",
                    0x00_0001,
                    0x8_0000,
                    0x59ba_9b43,
                    "6c6690a2e389fc9f1e166c87748da1175e3b58f8",
                ),
            ],
        }
    }
}

/// ROM regions of `variant`.
///
/// The MCU's internal region carries the NVRAM defaults of its MCON, RPCTL
/// and CRCR registers at their SFR addresses.
#[must_use]
pub fn rom_table(variant: Thoop2Variant) -> RomTable {
    let [even, odd] = variant.program_roms();
    RomTable::new()
        .region(
            RomRegionSpec::new("maincpu", 0x10_0000)
                .file(even.interleaved())
                .file(odd.interleaved()),
        )
        .region(RomRegionSpec::new("mcu:sram", 0x8000).file(RomFileSpec::new(
            "thoop2_ds5002fp.bin",
            0,
            0x8000,
            0x6881_384d,
            "c1eff5558716293e1325b766e2205783286c12f9",
        )))
        .region(
            RomRegionSpec::new("mcu:internal", 0x100)
                .with_fill_byte(0x00)
                .fill_at(0xc6, 0x79)
                .fill_at(0xd8, 0x00)
                .fill_at(0xc1, 0x80),
        )
        .region(
            RomRegionSpec::new("gfx1", 0x80_0000)
                .file(RomFileSpec::new(
                    "th2-h8.h8",
                    0x00_0000,
                    0x40_0000,
                    0x6032_8a11,
                    "fcdb374d2fc7ef5351a4181c471d192199dc2081",
                ))
                .file(RomFileSpec::new(
                    "th2-h12.h12",
                    0x40_0000,
                    0x40_0000,
                    0xb25c_2d3e,
                    "d70f3e4e2432d80c2ac87cd81208ada303bac04a",
                )),
        )
        .region(RomRegionSpec::new("oki", 0x10_0000).file(RomFileSpec::new(
            "th2-c1.c1",
            0,
            0x10_0000,
            0x8fac_8c30,
            "8e49bb596144761eae95f3e1266e57fb386664f2",
        )))
}

const COIN_B: &[(u32, &str)] = &[
    (0x02, "6 Coins/1 Credit"),
    (0x03, "5 Coins/1 Credit"),
    (0x04, "4 Coins/1 Credit"),
    (0x05, "3 Coins/1 Credit"),
    (0x06, "2 Coins/1 Credit"),
    (0x01, "3 Coins/2 Credits"),
    (0x00, "4 Coins/3 Credits"),
    (0x07, "1 Coin/1 Credit"),
];

const COIN_A: &[(u32, &str)] = &[
    (0x38, "1 Coin/1 Credit"),
    (0x00, "3 Coins/4 Credits"),
    (0x08, "2 Coins/3 Credits"),
    (0x30, "1 Coin/2 Credits"),
    (0x28, "1 Coin/3 Credits"),
    (0x20, "1 Coin/4 Credits"),
    (0x18, "1 Coin/5 Credits"),
    (0x10, "1 Coin/6 Credits"),
];

fn off_on(mask: u32, off: u32) -> [(u32, &'static str); 2] {
    [(off, "Off"), (off ^ mask, "On")]
}

fn player_port(tag: &str, player: u8) -> InputPortSpec {
    InputPortSpec::new(tag)
        .digital(0x01, InputType::JoystickUp, player, true)
        .digital(0x02, InputType::JoystickDown, player, true)
        .digital(0x04, InputType::JoystickRight, player, true)
        .digital(0x08, InputType::JoystickLeft, player, true)
        .digital(0x10, InputType::Button(2), player, true)
        .digital(0x20, InputType::Button(1), player, true)
}

/// Input ports: two DIP banks, two player panels and the system port.
#[must_use]
pub fn input_ports() -> Vec<InputPortSpec> {
    vec![
        InputPortSpec::new("DSW1")
            .dip("Coin B", 0x07, 0x07, COIN_B)
            .dip("Coin A", 0x38, 0x38, COIN_A)
            .dip(
                "Credit configuration",
                0x40,
                0x40,
                &[(0x40, "Start 1C/Continue 1C"), (0x00, "Start 2C/Continue 1C")],
            )
            .dip("Free Play", 0x80, 0x80, &off_on(0x80, 0x80)),
        InputPortSpec::new("DSW2")
            .dip(
                "Difficulty",
                0x03,
                0x03,
                &[(0x03, "Normal"), (0x02, "Easy"), (0x01, "Hard"), (0x00, "Hardest")],
            )
            .dip("Unknown 2-3", 0x04, 0x04, &off_on(0x04, 0x04))
            .dip(
                "Lives",
                0x18,
                0x18,
                &[(0x18, "2"), (0x10, "3"), (0x08, "4"), (0x00, "1")],
            )
            .dip("Demo Sounds", 0x20, 0x20, &[(0x00, "Off"), (0x20, "On")])
            .dip("Unknown 2-7", 0x40, 0x40, &off_on(0x40, 0x40))
            .dip("Service Mode", 0x80, 0x80, &off_on(0x80, 0x80)),
        player_port("P1", 1)
            .digital(0x40, InputType::Coin(1), 1, true)
            .digital(0x80, InputType::Coin(2), 1, true),
        player_port("P2", 2)
            .digital(0x40, InputType::Start(1), 1, true)
            .digital(0x80, InputType::Start(2), 1, true),
        InputPortSpec::new("SYSTEM")
            .digital(0x01, InputType::Service(1), 1, true)
            .digital(0x02, InputType::Service(2), 1, true)
            .digital(0x04, InputType::Button(3), 1, true)
            .digital(0x08, InputType::Button(3), 2, true)
            .unused(0xf0, 0xf0),
    ]
}

fn main_map() -> AddressMap {
    let mut map = AddressMap::new(
        "program",
        BusConfig::new(AccessWidth::Word, Endianness::Big, 24, UnmappedRead::AllZeros),
    );
    map.range(0x00_0000, 0x0f_ffff).name("rom").rom("maincpu", 0);
    map.range(0x10_0000, 0x10_1fff).name("videoram").share("videoram");
    map.range(0x10_8000, 0x10_8007).name("vregs").write_share("vregs");
    map.range(0x10_800c, 0x10_800d).name("watchdog").write_watchdog();
    map.range(0x20_0000, 0x20_07ff).name("palette").share("palette");
    map.range(0x44_0000, 0x44_0fff).name("spriteram").share("spriteram");
    map.range(0x70_0000, 0x70_0001).name("dsw2").port("DSW2");
    map.range(0x70_0002, 0x70_0003).name("dsw1").port("DSW1");
    map.range(0x70_0004, 0x70_0005).name("p1").port("P1");
    map.range(0x70_0006, 0x70_0007).name("p2").port("P2");
    map.range(0x70_0008, 0x70_0009).name("system").port("SYSTEM");
    map.range(0x70_000a, 0x70_000b)
        .name("outlatch")
        .lanes(0x00ff)
        .select(0x0070)
        .write_device("outlatch");
    map.range(0x70_000c, 0x70_000d)
        .name("okibank")
        .lanes(0x00ff)
        .write_bank_select("okibank", 0);
    map.range(0x70_000e, 0x70_000f)
        .name("oki")
        .lanes(0x00ff)
        .device("oki");
    map.range(0xfe_0000, 0xfe_7fff).name("workram").ram();
    map.range(0xfe_8000, 0xfe_ffff).name("shareram").share("shareram");
    map
}

fn mcu_map() -> AddressMap {
    let mut map = AddressMap::new(
        "hostmem",
        BusConfig::new(AccessWidth::Byte, Endianness::Big, 16, UnmappedRead::AllOnes),
    );
    map.range(0x8000, 0xffff).name("shareram").share("shareram");
    map
}

fn oki_map() -> AddressMap {
    let mut map = AddressMap::new(
        "samples",
        BusConfig::new(AccessWidth::Byte, Endianness::Big, 18, UnmappedRead::AllOnes),
    );
    map.range(0x0_0000, 0x2_ffff).name("fixed").rom("oki", 0);
    map.range(0x3_0000, 0x3_ffff).name("banked").bank("okibank");
    map
}

fn scripted(tag: &str, clock: u64, program: &str, map: AddressMap) -> DeviceSpec {
    DeviceSpec::new(tag, "scripted-master", clock)
        .with_option("program", OptionValue::Text(program.to_owned()))
        .with_option("loop", OptionValue::Bool(true))
        .with_map(map)
}

/// Complete machine description of `variant` with the default CPU programs.
#[must_use]
pub fn machine_config(variant: Thoop2Variant) -> MachineConfig {
    let mut config = MachineConfig::new(variant.name(), variant.description());
    config.devices = vec![
        scripted("maincpu", MAIN_CLOCK, MAIN_PROGRAM, main_map()),
        scripted("mcu", MCU_CLOCK, MCU_PROGRAM, mcu_map()).with_rom_region("mcu:sram"),
        DeviceSpec::new("outlatch", "addressable-latch", 0),
        DeviceSpec::new("oki", "sample-chip", OKI_CLOCK)
            .with_option("pin7", OptionValue::Text("high".to_owned()))
            .with_rom_region("oki")
            .with_map(oki_map()),
    ];
    config.roms = rom_table(variant);
    config.banks = vec![BankSpec::new("okibank", "oki", 0x1_0000, 16, BankPolicy::Mask)];
    config.shares = vec![ShareSpec::new(
        "shareram",
        0x8000,
        MemoryLayout::new(Endianness::Little, AccessWidth::Word),
    )];
    config.ports = input_ports();
    config.routes = vec![
        LineRoute::new(
            "outlatch",
            0,
            LineTarget::CoinLockout {
                slot: 0,
                active_low: true,
            },
        ),
        LineRoute::new(
            "outlatch",
            1,
            LineTarget::CoinLockout {
                slot: 1,
                active_low: true,
            },
        ),
        LineRoute::new("outlatch", 2, LineTarget::CoinCounter { slot: 0 }),
        LineRoute::new("outlatch", 3, LineTarget::CoinCounter { slot: 1 }),
        LineRoute::new("outlatch", 4, LineTarget::Unconnected),
        LineRoute::new("outlatch", 5, LineTarget::Unconnected),
    ];
    config.scheduler = SchedulerConfig {
        refresh: RefreshRate::centihertz(REFRESH_CENTIHERTZ),
        ..SchedulerConfig::default()
    };
    config.interrupts = vec![PeriodicInterrupt {
        device: "maincpu".to_owned(),
        line: VBLANK_LEVEL,
        quantum: config.scheduler.quanta_per_frame - 1,
    }];
    config.watchdog = Some(WatchdogConfig {
        interval_frames: WATCHDOG_FRAMES,
    });
    config
}

#[cfg(test)]
mod tests {
    use super::{machine_config, rom_table, Thoop2Variant};
    use crate::device::OptionValue;
    use crate::input::InputType;
    use crate::machine::Machine;
    use crate::rom::{IntegrityPolicy, MemorySource, RomLoadOptions};

    fn degraded() -> RomLoadOptions {
        RomLoadOptions {
            policy: IntegrityPolicy::Degraded,
        }
    }

    fn blank_board(main: &str) -> Machine {
        let mut config = machine_config(Thoop2Variant::Thoop2);
        config.devices[0].set_option("program", OptionValue::Text(main.to_owned()));
        let source = MemorySource::blank_for(&config.roms, 0x00);
        config.build(&source, &degraded()).expect("board builds")
    }

    #[test]
    fn variants_are_found_by_name() {
        assert_eq!(Thoop2Variant::from_name("thoop2a"), Some(Thoop2Variant::Thoop2a));
        assert_eq!(Thoop2Variant::from_name("thoop3"), None);
        let names: Vec<_> = rom_table(Thoop2Variant::Thoop2a)
            .files()
            .map(|(_, file)| file.name.clone())
            .collect();
        assert!(names.contains(&"3.c23".to_owned()));
        assert!(!names.contains(&"th2c23.c23".to_owned()));
    }

    #[test]
    fn strict_load_of_blank_images_fails() {
        let config = machine_config(Thoop2Variant::Thoop2);
        let source = MemorySource::blank_for(&config.roms, 0xff);
        assert!(config.build(&source, &RomLoadOptions::default()).is_err());
    }

    #[test]
    fn program_roms_interleave_into_big_endian_words() {
        let mut config = machine_config(Thoop2Variant::Thoop2);
        config.devices[0].set_option("program", OptionValue::Text("halt".to_owned()));
        let mut source = MemorySource::blank_for(&config.roms, 0x00);
        if let Some(image) = source.image_mut("th2c23.c23") {
            image[0] = 0x12;
        }
        if let Some(image) = source.image_mut("th2c22.c22") {
            image[0] = 0x34;
        }
        let mut machine = config.build(&source, &degraded()).expect("board builds");
        let mut bus = machine.host_bus("maincpu").expect("main cpu");
        assert_eq!(bus.read16(0), 0x1234);
        assert_eq!(bus.read8(1), 0x34);
    }

    #[test]
    fn mcu_internal_region_carries_register_defaults() {
        let machine = blank_board("halt");
        let internal = machine.region("mcu:internal").expect("declared");
        assert_eq!(internal.len(), 0x100);
        assert_eq!(internal[0xc6], 0x79);
        assert_eq!(internal[0xc1], 0x80);
        assert_eq!(internal[0x00], 0x00);
    }

    #[test]
    fn shared_ram_bytes_agree_between_cpu_and_mcu() {
        let mut machine = blank_board("halt");
        machine
            .host_bus("maincpu")
            .expect("main cpu")
            .write16(0xfe_8000, 0xbeef);
        let mut mcu = machine.host_bus("mcu").expect("mcu");
        assert_eq!(mcu.read8(0x8000), 0xbe);
        assert_eq!(mcu.read8(0x8001), 0xef);
        mcu.write8(0x8003, 0x42);
        assert_eq!(
            machine.host_bus("maincpu").expect("main cpu").read16(0xfe_8002),
            0x0042
        );
    }

    #[test]
    fn ports_read_defaults_and_follow_controls() {
        let mut machine = blank_board("halt");
        assert_eq!(machine.host_bus("maincpu").expect("main cpu").read16(0x70_0002), 0xff);
        assert_eq!(machine.host_bus("maincpu").expect("main cpu").read16(0x70_0000), 0xff);
        machine
            .inputs_mut()
            .set_input(1, InputType::Coin(1), true)
            .expect("coin 1 wired");
        machine
            .inputs_mut()
            .set_dip("DSW2", "Lives", "4")
            .expect("lives switch");
        let mut bus = machine.host_bus("maincpu").expect("main cpu");
        assert_eq!(bus.read16(0x70_0004), 0xbf);
        assert_eq!(bus.read16(0x70_0000), 0xef);
    }

    #[test]
    fn latch_writes_count_coins_and_engage_lockouts() {
        let mut machine = blank_board(
            "w16 0x70000a 1; w16 0x70002a 1; w16 0x70002a 0; w16 0x70003a 1; halt",
        );
        assert!(machine.bookkeeping().lockouts[0]);
        machine.run_frame();
        let bookkeeping = machine.bookkeeping();
        assert_eq!(bookkeeping.coin_counters[0], 1);
        assert_eq!(bookkeeping.coin_counters[1], 1);
        assert!(!bookkeeping.lockouts[0]);
        assert!(bookkeeping.lockouts[1]);
    }

    #[test]
    fn sound_bank_select_masks_to_sixteen_pages() {
        let mut machine = blank_board("w16 0x70000c 0x0013; halt");
        machine.run_frame();
        assert_eq!(machine.bank_index("okibank"), Some(3));
    }

    #[test]
    fn default_program_keeps_the_watchdog_quiet() {
        let mut machine = blank_board(super::MAIN_PROGRAM);
        machine.run_frames(u64::from(super::WATCHDOG_FRAMES) * 3);
        assert_eq!(machine.watchdog_resets(), 0);
        let interrupts = machine
            .device_state("maincpu")
            .map(|state| state.u64("interrupts"));
        assert_eq!(interrupts, Some(Ok(u64::from(super::WATCHDOG_FRAMES) * 3)));
    }

    #[test]
    fn silent_main_cpu_trips_the_watchdog() {
        let mut machine = blank_board("wait");
        machine.run_frames(u64::from(super::WATCHDOG_FRAMES));
        assert_eq!(machine.watchdog_resets(), 1);
    }
}
