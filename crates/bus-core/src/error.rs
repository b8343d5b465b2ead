use std::path::PathBuf;

use thiserror::Error;

/// Fatal machine-description errors reported by [`crate::MachineConfig::build`].
///
/// A configuration that produces any of these never yields a running machine.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two entries of one space and direction claim the same address and byte lanes.
    #[error(
        "address space `{space}`: entries `{first}` and `{second}` overlap at {start:#x}..={end:#x}"
    )]
    Overlap {
        /// Address space name.
        space: String,
        /// Entry registered first.
        first: String,
        /// Entry that collided with `first`.
        second: String,
        /// Inclusive start of the clashing range.
        start: u32,
        /// Inclusive end of the clashing range.
        end: u32,
    },
    /// Entry start lies after its end.
    #[error("address space `{space}`: entry `{entry}` starts at {start:#x} after its end {end:#x}")]
    EmptyRange {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Inclusive start address.
        start: u32,
        /// Inclusive end address.
        end: u32,
    },
    /// Entry reaches beyond the space's address width.
    #[error(
        "address space `{space}`: entry `{entry}` ({start:#x}..={end:#x}) exceeds the {bits}-bit address range"
    )]
    RangeOutOfSpace {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Inclusive start address.
        start: u32,
        /// Inclusive end address.
        end: u32,
        /// Address width of the space.
        bits: u8,
    },
    /// Entry bounds are not aligned to the data-bus unit.
    #[error(
        "address space `{space}`: entry `{entry}` ({start:#x}..={end:#x}) is not aligned to {unit}-byte bus units"
    )]
    MisalignedRange {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Inclusive start address.
        start: u32,
        /// Inclusive end address.
        end: u32,
        /// Bus unit size in bytes.
        unit: u32,
    },
    /// Lane mask is empty, wider than the bus, or splits a byte lane.
    #[error("address space `{space}`: entry `{entry}` has invalid lane mask {lanes:#x}")]
    InvalidLaneMask {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Offending lane mask.
        lanes: u32,
    },
    /// Mirror or select bits collide with the range or with each other.
    #[error("address space `{space}`: entry `{entry}` has invalid mirror/select bits: {reason}")]
    InvalidMirror {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A write-only target was used on the read side.
    #[error("address space `{space}`: entry `{entry}` maps a write-only target for reads")]
    NotReadable {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
    },
    /// A read-only target was used on the write side.
    #[error("address space `{space}`: entry `{entry}` maps a read-only target for writes")]
    NotWritable {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
    },
    /// Entry declares neither a read nor a write target.
    #[error("address space `{space}`: entry `{entry}` has no read or write target")]
    NoTarget {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
    },
    /// Referenced ROM region does not exist.
    #[error("{context}: unknown rom region `{region}`")]
    UnknownRomRegion {
        /// Where the reference was made.
        context: String,
        /// Missing region name.
        region: String,
    },
    /// Mapped window is larger than the backing storage.
    #[error(
        "address space `{space}`: entry `{entry}` needs {needed:#x} bytes of `{backing}` but only {available:#x} are available"
    )]
    WindowOutOfRange {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// ROM region, share or bank backing the entry.
        backing: String,
        /// Bytes the window requires.
        needed: u64,
        /// Bytes the backing provides.
        available: u64,
    },
    /// Referenced bank does not exist.
    #[error("address space `{space}`: entry `{entry}` references unknown bank `{bank}`")]
    UnknownBank {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Missing bank name.
        bank: String,
    },
    /// Referenced input port does not exist.
    #[error("address space `{space}`: entry `{entry}` references unknown input port `{port}`")]
    UnknownPort {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Missing port tag.
        port: String,
    },
    /// Referenced device tag does not exist.
    #[error("{context}: unknown device `{tag}`")]
    UnknownDevice {
        /// Where the reference was made.
        context: String,
        /// Missing device tag.
        tag: String,
    },
    /// A device maps its own handlers into a space it masters.
    #[error("address space `{space}`: entry `{entry}` maps device `{tag}` into its own space")]
    SelfMappedDevice {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
        /// Device tag.
        tag: String,
    },
    /// A watchdog target is mapped but the machine declares no watchdog.
    #[error("address space `{space}`: entry `{entry}` maps a watchdog but none is configured")]
    NoWatchdog {
        /// Address space name.
        space: String,
        /// Entry name.
        entry: String,
    },
    /// Two devices share one tag.
    #[error("duplicate device tag `{tag}`")]
    DuplicateDevice {
        /// Duplicated tag.
        tag: String,
    },
    /// Two memory blocks or banks share one name.
    #[error("duplicate {kind} `{name}`")]
    DuplicateName {
        /// Kind of named object.
        kind: &'static str,
        /// Duplicated name.
        name: String,
    },
    /// Device type name is not registered.
    #[error("device `{tag}`: unknown device type `{type_name}`")]
    UnknownDeviceType {
        /// Device tag.
        tag: String,
        /// Requested type name.
        type_name: String,
    },
    /// Device type registered twice.
    #[error("device type `{type_name}` is already registered")]
    DuplicateDeviceType {
        /// Type name.
        type_name: String,
    },
    /// Option is not declared by the device type.
    #[error("device `{tag}`: unknown option `{option}`")]
    UnknownOption {
        /// Device tag.
        tag: String,
        /// Option name.
        option: String,
    },
    /// Required option was not supplied.
    #[error("device `{tag}`: missing required option `{option}`")]
    MissingOption {
        /// Device tag.
        tag: String,
        /// Option name.
        option: String,
    },
    /// Option value has the wrong kind or is out of range.
    #[error("device `{tag}`: invalid option `{option}`: {reason}")]
    InvalidOption {
        /// Device tag.
        tag: String,
        /// Option name.
        option: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Device type requires a clock but none was configured.
    #[error("device `{tag}`: a non-zero clock is required")]
    MissingClock {
        /// Device tag.
        tag: String,
    },
    /// Device was given the wrong number of address maps.
    #[error("device `{tag}`: expected {expected} address map(s), found {found}")]
    SpaceCountMismatch {
        /// Device tag.
        tag: String,
        /// Maps the type masters.
        expected: usize,
        /// Maps supplied.
        found: usize,
    },
    /// Device type requires a ROM region but none was configured.
    #[error("device `{tag}`: a rom region is required")]
    MissingDeviceRom {
        /// Device tag.
        tag: String,
    },
    /// Device ROM region is smaller than the type's minimum.
    #[error("device `{tag}`: rom region `{region}` has {size:#x} bytes, needs at least {min:#x}")]
    RomRegionTooSmall {
        /// Device tag.
        tag: String,
        /// Region name.
        region: String,
        /// Actual size.
        size: usize,
        /// Required minimum.
        min: usize,
    },
    /// Bank geometry is inconsistent with its region.
    #[error("bank `{bank}`: {reason}")]
    InvalidBank {
        /// Bank name.
        bank: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Scheduler parameters are unusable.
    #[error("scheduler: {reason}")]
    InvalidScheduler {
        /// Human-readable reason.
        reason: String,
    },
    /// Output-line route is malformed.
    #[error("line route from `{device}` line {line}: {reason}")]
    InvalidRoute {
        /// Source device tag.
        device: String,
        /// Source output line.
        line: u8,
        /// Human-readable reason.
        reason: String,
    },
    /// Periodic interrupt is malformed.
    #[error("periodic interrupt for `{device}`: {reason}")]
    InvalidInterrupt {
        /// Target device tag.
        device: String,
        /// Human-readable reason.
        reason: String,
    },
    /// ROM set could not be assembled.
    #[error(transparent)]
    Rom(#[from] RomError),
    /// Input port table is inconsistent.
    #[error(transparent)]
    Input(#[from] InputError),
}

/// Errors raised while assembling ROM regions from image files.
#[derive(Debug, Error)]
pub enum RomError {
    /// A required image is absent from the source.
    #[error("rom region `{region}`: required image `{file}` not found")]
    Missing {
        /// Region being assembled.
        region: String,
        /// Image name.
        file: String,
    },
    /// Image length differs from the table.
    #[error("rom image `{file}`: expected {expected:#x} bytes, found {actual:#x}")]
    SizeMismatch {
        /// Image name.
        file: String,
        /// Length declared by the table.
        expected: usize,
        /// Length of the supplied image.
        actual: usize,
    },
    /// Image digest differs from the table.
    #[error(
        "rom image `{file}`: checksum mismatch (expected crc32 {expected_crc32:08x} sha1 {expected_sha1}, found crc32 {actual_crc32:08x} sha1 {actual_sha1})"
    )]
    ChecksumMismatch {
        /// Image name.
        file: String,
        /// CRC32 declared by the table.
        expected_crc32: u32,
        /// SHA-1 declared by the table, lowercase hex.
        expected_sha1: String,
        /// CRC32 of the supplied image.
        actual_crc32: u32,
        /// SHA-1 of the supplied image, lowercase hex.
        actual_sha1: String,
    },
    /// Table carries a SHA-1 that is not 40 hex digits.
    #[error("rom image `{file}`: invalid sha1 digest `{digest}`")]
    InvalidDigest {
        /// Image name.
        file: String,
        /// Offending digest text.
        digest: String,
    },
    /// Image placement runs past the end of its region.
    #[error("rom region `{region}`: image `{file}` at {offset:#x} does not fit")]
    LayoutOutOfRange {
        /// Region name.
        region: String,
        /// Image name.
        file: String,
        /// Load offset.
        offset: u32,
    },
    /// Fill byte lies outside its region.
    #[error("rom region `{region}`: fill at {offset:#x} is out of range")]
    FillOutOfRange {
        /// Region name.
        region: String,
        /// Fill offset.
        offset: u32,
    },
    /// Region declared twice.
    #[error("duplicate rom region `{region}`")]
    DuplicateRegion {
        /// Region name.
        region: String,
    },
    /// Reading an image from disk failed.
    #[error("failed to read rom image `{}`", .path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the input-port table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Port tag declared twice.
    #[error("duplicate input port `{port}`")]
    DuplicatePort {
        /// Port tag.
        port: String,
    },
    /// Port tag is not declared.
    #[error("unknown input port `{port}`")]
    UnknownPort {
        /// Port tag.
        port: String,
    },
    /// Field mask is zero.
    #[error("input port `{port}`: field `{field}` has an empty mask")]
    EmptyMask {
        /// Port tag.
        port: String,
        /// Field label.
        field: String,
    },
    /// Two fields of one port share bits.
    #[error("input port `{port}`: field `{field}` overlaps mask {mask:#x}")]
    OverlappingFields {
        /// Port tag.
        port: String,
        /// Field label.
        field: String,
        /// Bits already claimed.
        mask: u32,
    },
    /// DIP setting value has bits outside the field mask.
    #[error("input port `{port}`: setting {value:#x} of `{field}` lies outside its mask")]
    SettingOutOfMask {
        /// Port tag.
        port: String,
        /// Field label.
        field: String,
        /// Offending value.
        value: u32,
    },
    /// DIP default is not one of the listed settings.
    #[error("input port `{port}`: default of `{field}` is not a listed setting")]
    InvalidDefault {
        /// Port tag.
        port: String,
        /// Field label.
        field: String,
    },
    /// DIP switch name is not declared on the port.
    #[error("input port `{port}`: unknown dip switch `{field}`")]
    UnknownField {
        /// Port tag.
        port: String,
        /// Field label.
        field: String,
    },
    /// DIP setting label is not declared on the switch.
    #[error("input port `{port}`: dip switch `{field}` has no setting `{setting}`")]
    UnknownSetting {
        /// Port tag.
        port: String,
        /// Field label.
        field: String,
        /// Requested label.
        setting: String,
    },
    /// No digital field carries the requested input.
    #[error("no input `{input}` for player {player}")]
    UnmatchedInput {
        /// Input description.
        input: String,
        /// Player number.
        player: u8,
    },
}

/// Errors raised while parsing a scripted bus-master program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("program line {line}: {message}")]
pub struct ScriptError {
    /// One-based statement number.
    pub line: usize,
    /// Human-readable reason.
    pub message: String,
}

/// Errors raised while restoring a [`crate::MachineSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Snapshot was taken from a different machine description.
    #[error("snapshot belongs to machine `{found}`, expected `{expected}`")]
    MachineMismatch {
        /// Running machine name.
        expected: String,
        /// Name recorded in the snapshot.
        found: String,
    },
    /// Snapshot lacks a named entry the machine needs.
    #[error("snapshot has no {kind} `{name}`")]
    Missing {
        /// Kind of entry.
        kind: &'static str,
        /// Entry name.
        name: String,
    },
    /// Memory block length differs.
    #[error("snapshot block `{name}` has {found:#x} bytes, expected {expected:#x}")]
    BlockSizeMismatch {
        /// Block name.
        name: String,
        /// Machine block length.
        expected: usize,
        /// Snapshot block length.
        found: usize,
    },
    /// Bank index is not a valid entry.
    #[error("snapshot selects entry {index} of bank `{name}` which has {entries} entries")]
    BankOutOfRange {
        /// Bank name.
        name: String,
        /// Recorded index.
        index: u32,
        /// Entry count.
        entries: u32,
    },
    /// Input-port live state does not fit the port table.
    #[error("snapshot input state for port `{port}` does not match the port table")]
    InputMismatch {
        /// Port tag.
        port: String,
    },
    /// Device state lacks a field or holds the wrong kind of value.
    #[error("device state field `{field}` is missing or has the wrong kind")]
    Field {
        /// Field name.
        field: String,
    },
    /// Device state field holds a value the device cannot accept.
    #[error("device state field `{field}` is out of range")]
    FieldRange {
        /// Field name.
        field: String,
    },
    /// Restoring one device failed.
    #[error("device `{tag}`: {source}")]
    Device {
        /// Device tag.
        tag: String,
        /// Device-level failure.
        #[source]
        source: Box<SnapshotError>,
    },
}
