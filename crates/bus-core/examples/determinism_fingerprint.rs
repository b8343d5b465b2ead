//! Deterministic machine-run fingerprint used for cross-host comparison.

#![allow(clippy::cast_possible_truncation)]

use bus_core::boards::thoop2;
use bus_core::{InputType, IntegrityPolicy, MemorySource, RomLoadOptions, Thoop2Variant};
use crc32fast as _;
use hex as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use sha1 as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

fn synthetic_source(config: &bus_core::MachineConfig) -> MemorySource {
    let mut source = MemorySource::blank_for(&config.roms, 0x00);
    for (_, file) in config.roms.files() {
        if let Some(image) = source.image_mut(&file.name) {
            let seed = file.crc32;
            for (index, byte) in image.iter_mut().enumerate() {
                *byte = (seed.rotate_left(index as u32 % 32) ^ index as u32) as u8;
            }
        }
    }
    source
}

fn fingerprint() -> String {
    let config = thoop2::machine_config(Thoop2Variant::Thoop2);
    let source = synthetic_source(&config);
    let options = RomLoadOptions {
        policy: IntegrityPolicy::Degraded,
    };
    let mut machine = config
        .build(&source, &options)
        .expect("synthetic board should build");

    machine.run_frames(4);
    machine
        .inputs_mut()
        .set_input(1, InputType::Coin(1), true)
        .expect("coin 1 is wired");
    machine.run_frames(2);
    machine
        .inputs_mut()
        .set_input(1, InputType::Coin(1), false)
        .expect("coin 1 is wired");
    machine
        .inputs_mut()
        .set_dip("DSW2", "Lives", "3")
        .expect("lives switch exists");
    machine.run_frames(10);

    format!("{:016x}", machine.save_state().fingerprint())
}

fn main() {
    println!("{}", fingerprint());
}
