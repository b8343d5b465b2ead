//! Address resolution, bank switching, shared memory and byte-lane coverage.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]

use bus_core::{
    AccessWidth, AddressMap, BankPolicy, BankSpec, BusConfig, ConfigError, DeviceSpec,
    Endianness, InputPortSpec, Machine, MachineConfig, MemoryLayout, MemorySource, OptionValue,
    RomDigest, RomFileSpec, RomLoadOptions, RomRegionSpec, ShareSpec, UnmappedRead,
};
use crc32fast as _;
use hex as _;
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use sha1 as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

const ROM_START: u32 = 0x1000;
const ROM_LEN: usize = 0x1000;
const RAM_START: u32 = 0x4000;
const WINDOW_START: u32 = 0x8000;
const PAGE: u32 = 0x100;
const PAGES: u32 = 8;
const SELECT: u32 = 0x9000;

fn rom_bytes() -> Vec<u8> {
    (0..ROM_LEN).map(|index| (index * 7 + 3) as u8).collect()
}

fn page_byte(page: u32) -> u8 {
    0xa0 ^ page as u8
}

fn paged_bytes() -> Vec<u8> {
    (0..PAGES)
        .flat_map(|page| std::iter::repeat(page_byte(page)).take(PAGE as usize))
        .collect()
}

fn rom_file(name: &str, data: &[u8]) -> RomFileSpec {
    let digest = RomDigest::of(data);
    RomFileSpec::new(name, 0, data.len(), digest.crc32, &digest.sha1_hex())
}

fn master(tag: &str, map: AddressMap) -> DeviceSpec {
    DeviceSpec::new(tag, "scripted-master", 1_000_000)
        .with_option("program", OptionValue::Text("halt".to_owned()))
        .with_map(map)
}

fn byte_bus() -> BusConfig {
    BusConfig::new(AccessWidth::Byte, Endianness::Big, 16, UnmappedRead::AllOnes)
}

fn word_bus() -> BusConfig {
    BusConfig::new(AccessWidth::Word, Endianness::Big, 16, UnmappedRead::AllOnes)
}

fn rig(policy: BankPolicy) -> Machine {
    let mut map = AddressMap::new("program", byte_bus());
    map.range(ROM_START, ROM_START + ROM_LEN as u32 - 1)
        .name("rom")
        .rom("program", 0);
    map.range(RAM_START, RAM_START + 0xfff).name("ram").ram();
    map.range(WINDOW_START, WINDOW_START + PAGE - 1)
        .name("window")
        .bank("pages");
    map.range(SELECT, SELECT).name("select").write_bank_select("pages", 0);

    let rom = rom_bytes();
    let paged = paged_bytes();
    let mut config = MachineConfig::new("rig", "single master with rom, ram and a bank");
    config.devices.push(master("cpu", map));
    config.roms = bus_core::RomTable::new()
        .region(RomRegionSpec::new("program", ROM_LEN).file(rom_file("program.bin", &rom)))
        .region(
            RomRegionSpec::new("paged", paged.len()).file(rom_file("paged.bin", &paged)),
        );
    config
        .banks
        .push(BankSpec::new("pages", "paged", PAGE, PAGES, policy));
    let source = MemorySource::new()
        .with("program.bin", rom)
        .with("paged.bin", paged);
    config
        .build(&source, &RomLoadOptions::default())
        .expect("rig builds")
}

fn pair(layout: MemoryLayout) -> Machine {
    let mut wide = AddressMap::new("program", word_bus());
    wide.range(0x0000, 0x0fff).name("common").share("common");
    let mut narrow = AddressMap::new("program", byte_bus());
    narrow.range(0x2000, 0x2fff).name("common").share("common");

    let mut config = MachineConfig::new("pair", "two masters sharing one block");
    config.devices.push(master("wide", wide));
    config.devices.push(master("narrow", narrow));
    config.shares.push(ShareSpec::new("common", 0x1000, layout));
    config
        .build(&MemorySource::new(), &RomLoadOptions::default())
        .expect("pair builds")
}

proptest! {
    #[test]
    fn property_every_address_resolves_to_its_region_or_unmapped(addr in any::<u16>()) {
        let mut machine = rig(BankPolicy::Mask);
        let addr = u32::from(addr);
        let rom = rom_bytes();
        let readers: Vec<String> = machine
            .space("cpu:program")
            .expect("space")
            .readers_at(addr)
            .into_iter()
            .map(str::to_owned)
            .collect();
        let value = machine.host_bus("cpu").expect("cpu").read8(addr);

        if (ROM_START..ROM_START + ROM_LEN as u32).contains(&addr) {
            prop_assert_eq!(readers, vec!["rom".to_owned()]);
            prop_assert_eq!(value, rom[(addr - ROM_START) as usize]);
        } else if (RAM_START..=RAM_START + 0xfff).contains(&addr) {
            prop_assert_eq!(readers, vec!["ram".to_owned()]);
            prop_assert_eq!(value, 0);
        } else if (WINDOW_START..WINDOW_START + PAGE).contains(&addr) {
            prop_assert_eq!(readers, vec!["window".to_owned()]);
            prop_assert_eq!(value, page_byte(0));
        } else {
            prop_assert!(readers.is_empty());
            prop_assert_eq!(value, 0xff);
        }
    }

    #[test]
    fn property_masked_bank_select_wraps(raw in any::<u8>(), offset in 0..PAGE) {
        let mut machine = rig(BankPolicy::Mask);
        let mut bus = machine.host_bus("cpu").expect("cpu");
        bus.write8(SELECT, raw);
        prop_assert_eq!(bus.read8(WINDOW_START + offset), page_byte(u32::from(raw) % PAGES));
        drop(bus);
        prop_assert_eq!(machine.bank_index("pages"), Some(u32::from(raw) % PAGES));
    }

    #[test]
    fn property_clamped_bank_select_saturates(raw in any::<u8>()) {
        let mut machine = rig(BankPolicy::Clamp);
        let mut bus = machine.host_bus("cpu").expect("cpu");
        bus.write8(SELECT, raw);
        let page = u32::from(raw).min(PAGES - 1);
        prop_assert_eq!(bus.read8(WINDOW_START), page_byte(page));
    }

    #[test]
    fn property_shared_block_round_trips_between_masters(
        unit in 0_u32..0x800,
        value in any::<u16>(),
        byte in any::<u8>(),
        little in any::<bool>(),
    ) {
        let storage = if little { Endianness::Little } else { Endianness::Big };
        let mut machine = pair(MemoryLayout::new(storage, AccessWidth::Word));
        let offset = unit * 2;

        machine.host_bus("wide").expect("wide").write16(offset, value);
        let mut narrow = machine.host_bus("narrow").expect("narrow");
        prop_assert_eq!(narrow.read8(0x2000 + offset), (value >> 8) as u8);
        prop_assert_eq!(narrow.read8(0x2001 + offset), value as u8);
        narrow.write8(0x2001 + offset, byte);
        drop(narrow);

        let seen = machine.host_bus("wide").expect("wide").read16(offset);
        prop_assert_eq!(seen, (value & 0xff00) | u16::from(byte));
    }
}

#[test]
fn writes_to_rom_and_unmapped_space_are_dropped() {
    let mut machine = rig(BankPolicy::Mask);
    let before = machine.region("program").expect("region").to_vec();
    let mut bus = machine.host_bus("cpu").expect("cpu");
    bus.write8(ROM_START, 0x00);
    bus.write8(0x3000, 0x42);
    assert_eq!(bus.read8(0x3000), 0xff);
    drop(bus);
    assert_eq!(machine.region("program").expect("region"), before.as_slice());
}

#[test]
fn wide_reads_split_into_bus_units_in_bus_order() {
    let mut machine = rig(BankPolicy::Mask);
    let rom = rom_bytes();
    let mut bus = machine.host_bus("cpu").expect("cpu");
    let expected = u32::from_be_bytes([rom[4], rom[5], rom[6], rom[7]]);
    assert_eq!(bus.read32(ROM_START + 4), expected);

    bus.write32(RAM_START + 0x10, 0xdead_beef);
    assert_eq!(bus.read8(RAM_START + 0x10), 0xde);
    assert_eq!(bus.read16(RAM_START + 0x12), 0xbeef);
}

#[rstest]
#[case::all_ones(UnmappedRead::AllOnes, 0xffff)]
#[case::all_zeros(UnmappedRead::AllZeros, 0x0000)]
#[case::last_bus_value(UnmappedRead::LastBusValue, 0x1234)]
fn unmapped_reads_follow_the_bus_policy(#[case] unmapped: UnmappedRead, #[case] expected: u16) {
    let mut map = AddressMap::new(
        "program",
        BusConfig::new(AccessWidth::Word, Endianness::Big, 16, unmapped),
    );
    map.range(0x0000, 0x00ff).name("ram").ram();
    let mut config = MachineConfig::new("open-bus", "single master");
    config.devices.push(master("cpu", map));
    let mut machine = config
        .build(&MemorySource::new(), &RomLoadOptions::default())
        .expect("builds");

    let mut bus = machine.host_bus("cpu").expect("cpu");
    bus.write16(0x0000, 0x1234);
    assert_eq!(bus.read16(0x8000), expected);
}

#[test]
fn lane_restricted_entries_leave_other_lanes_alone() {
    let mut map = AddressMap::new("program", word_bus());
    map.range(0x0000, 0x0001).name("in").lanes(0x00ff).port("IN");
    map.range(0x0100, 0x01ff).name("high").lanes(0xff00).share("high");
    map.range(0x0100, 0x01ff).name("low").lanes(0x00ff).share("low");
    let mut config = MachineConfig::new("lanes", "byte lanes on a word bus");
    config.devices.push(master("cpu", map));
    config.ports.push(InputPortSpec::new("IN").unused(0xff, 0x5a));
    let mut machine = config
        .build(&MemorySource::new(), &RomLoadOptions::default())
        .expect("builds");

    let mut bus = machine.host_bus("cpu").expect("cpu");
    assert_eq!(bus.read16(0x0000), 0xff5a);
    bus.write16(0x0100, 0x1234);
    bus.write8(0x0101, 0x56);
    assert_eq!(bus.read16(0x0100), 0x1256);
    bus.write8(0x0100, 0x78);
    assert_eq!(bus.read16(0x0100), 0x7856);
    drop(bus);
    assert_eq!(
        machine.space("cpu:program").expect("space").readers_at(0x0100),
        vec!["high", "low"]
    );
}

#[test]
fn overlap_diagnostic_names_both_entries() {
    let mut map = AddressMap::new("program", byte_bus());
    map.range(0x0000, 0x0fff).name("work").ram();
    map.range(0x0800, 0x17ff).name("video").share("video");
    let mut config = MachineConfig::new("clash", "overlapping entries");
    config.devices.push(master("cpu", map));

    let error = config
        .build(&MemorySource::new(), &RomLoadOptions::default())
        .expect_err("overlap is fatal");
    match &error {
        ConfigError::Overlap {
            first,
            second,
            start,
            end,
            ..
        } => {
            assert_eq!(first, "work");
            assert_eq!(second, "video");
            assert_eq!((*start, *end), (0x0800, 0x0fff));
        }
        other => panic!("unexpected error {other:?}"),
    }
    let message = error.to_string();
    assert!(message.contains("work") && message.contains("video"));
}

#[test]
fn select_copies_reach_distinct_device_offsets() {
    let mut map = AddressMap::new("program", word_bus());
    map.range(0x2000, 0x2001)
        .name("latch")
        .lanes(0x00ff)
        .select(0x0070)
        .write_device("latch");
    let mut config = MachineConfig::new("selects", "latch behind select bits");
    config.devices.push(master("cpu", map));
    config
        .devices
        .push(DeviceSpec::new("latch", "addressable-latch", 0));
    let mut machine = config
        .build(&MemorySource::new(), &RomLoadOptions::default())
        .expect("builds");

    let mut bus = machine.host_bus("cpu").expect("cpu");
    bus.write16(0x2050, 0x0001);
    bus.write16(0x2010, 0x0001);
    bus.write16(0x2010, 0x0100);
    drop(bus);
    assert_eq!(
        machine.device_state("latch").map(|state| state.u64("outputs")),
        Some(Ok(0b0010_0000))
    );
}
