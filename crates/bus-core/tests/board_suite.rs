//! End-to-end runs of the built-in Thunder Hoop II board.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use bus_core::boards::{self, thoop2};
use bus_core::{
    InputType, IntegrityPolicy, Machine, MachineConfig, MemorySource, RomLoadOptions, RomStatus,
    SnapshotError, Thoop2Variant, WatchdogSnapshot,
};
use crc32fast as _;
use hex as _;
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use sha1 as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

fn degraded() -> RomLoadOptions {
    RomLoadOptions {
        policy: IntegrityPolicy::Degraded,
    }
}

fn sample_bytes() -> Vec<u8> {
    let mut data = vec![0_u8; 0x10_0000];
    // Phrase 1: 0x400..=0x4ff.
    data[8..14].copy_from_slice(&[0x00, 0x04, 0x00, 0x00, 0x04, 0xff]);
    for (index, byte) in data[0x400..0x500].iter_mut().enumerate() {
        *byte = index as u8;
    }
    data
}

fn build(config: &MachineConfig) -> Machine {
    let mut source = MemorySource::blank_for(&config.roms, 0x00);
    source.insert("th2-c1.c1", sample_bytes());
    config.build(&source, &degraded()).expect("board builds")
}

fn board(variant: Thoop2Variant) -> Machine {
    build(&thoop2::machine_config(variant))
}

#[rstest]
#[case::parent(Thoop2Variant::Thoop2)]
#[case::clone(Thoop2Variant::Thoop2a)]
fn blank_dumps_are_reported_but_the_board_runs(#[case] variant: Thoop2Variant) {
    let mut machine = board(variant);
    assert_eq!(machine.name(), variant.name());
    let report = machine.rom_report();
    assert_eq!(report.files().len(), 6);
    assert!(report
        .problems()
        .all(|entry| matches!(entry.status, RomStatus::BadChecksum { .. })));

    machine.run_frames(30);
    assert_eq!(machine.watchdog_resets(), 0);
    assert_eq!(machine.scheduler().frame(), 30);
    assert_eq!(machine.bank_index("okibank"), Some(3));
    assert_eq!(
        machine.block("shareram").map(|block| block.len()),
        Some(0x8000)
    );
}

#[test]
fn main_cpu_command_is_visible_to_the_mcu_and_back() {
    let mut machine = board(Thoop2Variant::Thoop2);
    machine.run_frames(2);
    let mut mcu = machine.host_bus("mcu").expect("mcu");
    assert_eq!(mcu.read8(0x8000), 0x01);
    assert_eq!(mcu.read8(0x8001), 0x01);
    drop(mcu);
    let mut main = machine.host_bus("maincpu").expect("main cpu");
    assert_eq!(main.read16(0xfe_8002), 0x5aa5);
}

#[test]
fn sound_chip_plays_phrases_through_its_own_space() {
    let mut config = thoop2::machine_config(Thoop2Variant::Thoop2);
    config.devices[0].set_option(
        "program",
        bus_core::OptionValue::Text("w16 0x70000e 0x81; w16 0x70000e 0x10; halt".to_owned()),
    );
    let mut machine = build(&config);
    machine.run_quantum();
    machine.run_quantum();
    let playing = machine.host_bus("maincpu").expect("main cpu").read16(0x70_000e);
    assert_eq!(playing, 0x00f1);

    machine.run_frames(6);
    let state = machine.device_state("oki").expect("oki state");
    assert_eq!(state.bool("voice0.active"), Ok(false));
    assert!(state.u64("samples").expect("samples") > 0x200);
    assert_ne!(machine.host_bus("maincpu").expect("main cpu").read16(0x70_000e), 0x00f1);
}

#[test]
fn snapshot_restore_reproduces_the_future() {
    let mut machine = board(Thoop2Variant::Thoop2);
    machine.run_frames(3);
    machine
        .inputs_mut()
        .set_input(1, InputType::Coin(1), true)
        .expect("coin wired");
    let checkpoint = machine.save_state();

    machine.run_frames(5);
    let expected = machine.save_state();

    machine.restore_state(&checkpoint).expect("own snapshot");
    assert_eq!(machine.save_state(), checkpoint);
    machine.run_frames(5);
    assert_eq!(machine.save_state(), expected);
    assert_eq!(machine.save_state().fingerprint(), expected.fingerprint());

    let mut fresh = board(Thoop2Variant::Thoop2);
    fresh.restore_state(&checkpoint).expect("same description");
    fresh.run_frames(5);
    assert_eq!(fresh.save_state(), expected);
}

#[test]
fn snapshots_do_not_cross_revisions() {
    let mut parent = board(Thoop2Variant::Thoop2);
    parent.run_frame();
    let mut clone = board(Thoop2Variant::Thoop2a);
    let untouched = clone.save_state();
    let result = clone.restore_state(&parent.save_state());
    assert!(matches!(result, Err(SnapshotError::MachineMismatch { .. })));
    assert_eq!(clone.save_state(), untouched);
}

#[test]
fn corrupt_bank_index_is_rejected_without_side_effects() {
    let mut machine = board(Thoop2Variant::Thoop2);
    machine.run_frame();
    let before = machine.save_state();
    let mut corrupt = before.clone();
    corrupt.banks.insert("okibank".to_owned(), 16);
    corrupt.quantum += 1000;
    let result = machine.restore_state(&corrupt);
    assert!(matches!(
        result,
        Err(SnapshotError::BankOutOfRange { index: 16, entries: 16, .. })
    ));
    assert_eq!(machine.save_state(), before);
}

#[test]
fn corrupt_voice_address_is_rejected_without_side_effects() {
    let mut machine = board(Thoop2Variant::Thoop2);
    machine.run_frame();
    let before = machine.save_state();
    let mut corrupt = before.clone();
    let oki = corrupt.devices.get_mut("oki").expect("oki state");
    oki.put_bool("voice0.active", true);
    oki.put_bool("voice0.nibble", true);
    oki.put_u64("voice0.address", u64::from(u32::MAX));
    oki.put_u64("voice0.end", u64::from(u32::MAX));
    let result = machine.restore_state(&corrupt);
    assert!(matches!(
        result,
        Err(SnapshotError::Device { ref tag, .. }) if tag == "oki"
    ));
    assert_eq!(machine.save_state(), before);
    machine.run_frame();
}

#[test]
fn watchdog_counter_past_its_interval_is_rejected() {
    let mut machine = board(Thoop2Variant::Thoop2);
    machine.run_frame();
    let interval = machine.watchdog().expect("thoop2 has a watchdog").interval();
    let before = machine.save_state();
    let mut corrupt = before.clone();
    corrupt.watchdog = Some(WatchdogSnapshot {
        counter: interval,
        expirations: 0,
    });
    let result = machine.restore_state(&corrupt);
    assert_eq!(
        result,
        Err(SnapshotError::FieldRange {
            field: "watchdog.counter".to_owned()
        })
    );
    assert_eq!(machine.save_state(), before);

    corrupt.watchdog = Some(WatchdogSnapshot {
        counter: interval - 1,
        expirations: 0,
    });
    assert_eq!(machine.restore_state(&corrupt), Ok(()));
}

#[test]
fn dip_switches_change_what_the_main_cpu_reads() {
    let mut machine = board(Thoop2Variant::Thoop2);
    let inputs = machine.inputs_mut();
    inputs.set_dip("DSW1", "Free Play", "On").expect("free play");
    inputs
        .set_dip("DSW1", "Coin A", "1 Coin/3 Credits")
        .expect("coin a");
    inputs.set_dip("DSW2", "Difficulty", "Hardest").expect("difficulty");
    assert_eq!(inputs.dip_setting("DSW2", "Difficulty"), Ok("Hardest"));
    assert!(inputs.set_dip("DSW2", "Difficulty", "Impossible").is_err());

    let mut main = machine.host_bus("maincpu").expect("main cpu");
    assert_eq!(main.read16(0x70_0002), 0x006f);
    assert_eq!(main.read16(0x70_0000), 0x00fc);
}

#[test]
fn every_catalogued_board_builds() {
    for info in boards::BOARDS {
        let config = boards::lookup(info.name).expect("catalogued");
        let machine = build(&config);
        assert_eq!(machine.description(), info.description);
        assert_eq!(
            machine.device_tags(),
            ["maincpu", "mcu", "outlatch", "oki"].map(str::to_owned)
        );
    }
}
