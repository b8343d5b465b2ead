#![no_main]

use bus_core::{
    AccessWidth, AddressMap, BankPolicy, BankSpec, BusConfig, DeviceSpec, Endianness,
    MachineConfig, MemorySource, OptionValue, RomLoadOptions, RomRegionSpec, RomTable,
    UnmappedRead,
};
use libfuzzer_sys::fuzz_target;

fn rig() -> MachineConfig {
    let mut map = AddressMap::new(
        "program",
        BusConfig::new(AccessWidth::Word, Endianness::Big, 16, UnmappedRead::LastBusValue),
    );
    map.range(0x0000, 0x0fff).name("rom").rom("program", 0);
    map.range(0x1000, 0x1fff).name("ram").ram();
    map.range(0x2000, 0x2001)
        .name("latch")
        .lanes(0x00ff)
        .select(0x0070)
        .write_device("latch");
    map.range(0x3000, 0x30ff).name("window").bank("pages");
    map.range(0x3100, 0x3101)
        .name("select")
        .lanes(0x00ff)
        .write_bank_select("pages", 0);
    map.range(0x4000, 0x4fff).name("mirrored").mirror(0x8000).share("common");

    let mut config = MachineConfig::new("fuzz", "dispatch fuzz rig");
    config.devices.push(
        DeviceSpec::new("cpu", "scripted-master", 1_000_000)
            .with_option("program", OptionValue::Text("halt".to_owned()))
            .with_map(map),
    );
    config
        .devices
        .push(DeviceSpec::new("latch", "addressable-latch", 0));
    config.roms = RomTable::new()
        .region(RomRegionSpec::new("program", 0x1000).with_fill_byte(0x5a))
        .region(RomRegionSpec::new("paged", 0x400).with_fill_byte(0xa5));
    config
        .banks
        .push(BankSpec::new("pages", "paged", 0x100, 4, BankPolicy::Clamp));
    config
}

fuzz_target!(|data: &[u8]| {
    let Ok(mut machine) = rig().build(&MemorySource::new(), &RomLoadOptions::default()) else {
        return;
    };
    let mut bus = match machine.host_bus("cpu") {
        Some(bus) => bus,
        None => return,
    };
    for chunk in data.chunks_exact(5) {
        let addr = u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        let value = u32::from(u16::from_be_bytes([chunk[2], chunk[3]]));
        let width = match chunk[4] & 0x03 {
            0 => AccessWidth::Byte,
            1 => AccessWidth::Word,
            _ => AccessWidth::Long,
        };
        if chunk[4] & 0x80 == 0 {
            let read = bus.read(0, addr, width);
            assert_eq!(read & !width.value_mask(), 0);
        } else {
            bus.write(0, addr, width, value);
        }
    }
    drop(bus);
    machine.run_quantum();
});
