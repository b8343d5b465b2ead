//! ROM image tables, integrity checking and region assembly.
//!
//! A [`RomTable`] lists the regions a machine needs and, per region, the image
//! files loaded into it together with their CRC32 and SHA-1 digests. Loading
//! pulls images from a [`RomSource`], places them according to their
//! [`LoadKind`] and reports every deviation from the table.

mod source;

pub use source::{DirectorySource, MemorySource, RomSource};

use std::collections::BTreeSet;
use std::fmt;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::memory::{MemoryBlock, MemoryLayout};
use crate::RomError;

/// How an image's bytes are placed into its region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LoadKind {
    /// Byte `i` lands at `offset + i`.
    #[default]
    Contiguous,
    /// Byte `i` lands at `offset + 2 * i`; pairs of images form 16-bit words.
    Interleave16,
}

impl LoadKind {
    /// Bytes of the region spanned by an image of `length` bytes.
    #[must_use]
    pub const fn footprint(self, length: usize) -> usize {
        match self {
            Self::Contiguous => length,
            Self::Interleave16 => length.saturating_mul(2).saturating_sub(1),
        }
    }

    const fn stride(self) -> usize {
        match self {
            Self::Contiguous => 1,
            Self::Interleave16 => 2,
        }
    }
}

/// CRC32 and SHA-1 of an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomDigest {
    /// CRC32 (IEEE).
    pub crc32: u32,
    /// SHA-1.
    pub sha1: [u8; 20],
}

impl RomDigest {
    /// Digests `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        let mut sha1 = [0_u8; 20];
        sha1.copy_from_slice(&Sha1::digest(data));
        Self {
            crc32: crc32fast::hash(data),
            sha1,
        }
    }

    /// SHA-1 as lowercase hex.
    #[must_use]
    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }
}

impl fmt::Debug for RomDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crc32 {:08x} sha1 {}", self.crc32, self.sha1_hex())
    }
}

/// One image file of a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomFileSpec {
    /// File name looked up in the source.
    pub name: String,
    /// Load offset inside the region.
    pub offset: u32,
    /// Expected image length.
    pub length: usize,
    /// Placement.
    pub load: LoadKind,
    /// Expected CRC32.
    pub crc32: u32,
    /// Expected SHA-1, 40 hex digits.
    pub sha1: String,
    /// Absence and checksum mismatch are reported instead of failing.
    pub best_effort: bool,
}

impl RomFileSpec {
    /// Describes a contiguously loaded image.
    #[must_use]
    pub fn new(name: &str, offset: u32, length: usize, crc32: u32, sha1: &str) -> Self {
        Self {
            name: name.to_owned(),
            offset,
            length,
            load: LoadKind::Contiguous,
            crc32,
            sha1: sha1.to_owned(),
            best_effort: false,
        }
    }

    /// Places the image on every second byte.
    #[must_use]
    pub fn interleaved(mut self) -> Self {
        self.load = LoadKind::Interleave16;
        self
    }

    /// Marks the image as optional.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Parses the declared digest.
    ///
    /// # Errors
    ///
    /// Returns [`RomError::InvalidDigest`] when `sha1` is not 40 hex digits.
    pub fn expected_digest(&self) -> Result<RomDigest, RomError> {
        let mut sha1 = [0_u8; 20];
        hex::decode_to_slice(&self.sha1, &mut sha1).map_err(|_| RomError::InvalidDigest {
            file: self.name.clone(),
            digest: self.sha1.clone(),
        })?;
        Ok(RomDigest {
            crc32: self.crc32,
            sha1,
        })
    }
}

/// Single byte written after all images of a region are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomFill {
    /// Offset inside the region.
    pub offset: u32,
    /// Byte value.
    pub value: u8,
}

/// A named region and the images that make it up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomRegionSpec {
    /// Region name referenced by maps, banks and devices.
    pub name: String,
    /// Region size in bytes.
    pub size: usize,
    /// Value of bytes no image covers.
    pub fill: u8,
    /// Images in load order.
    pub files: Vec<RomFileSpec>,
    /// Bytes patched after loading.
    pub fills: Vec<RomFill>,
}

impl RomRegionSpec {
    /// Creates an empty region filled with zeroes.
    #[must_use]
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            fill: 0,
            files: Vec::new(),
            fills: Vec::new(),
        }
    }

    /// Sets the background byte.
    #[must_use]
    pub const fn with_fill_byte(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    /// Adds an image.
    #[must_use]
    pub fn file(mut self, file: RomFileSpec) -> Self {
        self.files.push(file);
        self
    }

    /// Patches one byte after loading.
    #[must_use]
    pub fn fill_at(mut self, offset: u32, value: u8) -> Self {
        self.fills.push(RomFill { offset, value });
        self
    }
}

/// Every ROM region of a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomTable {
    regions: Vec<RomRegionSpec>,
}

impl RomTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Adds a region.
    #[must_use]
    pub fn region(mut self, region: RomRegionSpec) -> Self {
        self.regions.push(region);
        self
    }

    /// Regions in declaration order.
    #[must_use]
    pub fn regions(&self) -> &[RomRegionSpec] {
        &self.regions
    }

    /// Looks up a region by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RomRegionSpec> {
        self.regions.iter().find(|region| region.name == name)
    }

    /// Every image in the table with its region name.
    pub fn files(&self) -> impl Iterator<Item = (&str, &RomFileSpec)> {
        self.regions.iter().flat_map(|region| {
            region
                .files
                .iter()
                .map(move |file| (region.name.as_str(), file))
        })
    }
}

/// What happens when an image's digest differs from the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IntegrityPolicy {
    /// Mismatches are fatal.
    #[default]
    Strict,
    /// Mismatches are logged and reported; the image is used anyway.
    Degraded,
}

/// Loader settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomLoadOptions {
    /// Checksum policy.
    pub policy: IntegrityPolicy,
}

/// Outcome for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RomStatus {
    /// Present with matching digests.
    Good,
    /// Absent; the region keeps its fill byte there.
    Missing,
    /// Present with different digests.
    BadChecksum {
        /// Digest of the supplied image.
        actual: RomDigest,
    },
}

/// Per-image entry of a [`RomReport`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomFileReport {
    /// Region name.
    pub region: String,
    /// Image name.
    pub file: String,
    /// Outcome.
    pub status: RomStatus,
}

/// Status of every image considered by a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RomReport {
    files: Vec<RomFileReport>,
}

impl RomReport {
    /// All entries in table order.
    #[must_use]
    pub fn files(&self) -> &[RomFileReport] {
        &self.files
    }

    /// Entries whose status is not [`RomStatus::Good`].
    pub fn problems(&self) -> impl Iterator<Item = &RomFileReport> {
        self.files
            .iter()
            .filter(|entry| entry.status != RomStatus::Good)
    }

    /// Returns `true` when every image was present and matched.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problems().next().is_none()
    }
}

/// Assembled regions plus the integrity report.
#[derive(Debug, Clone)]
pub struct LoadedRoms {
    /// One block per region, in table order.
    pub regions: Vec<MemoryBlock>,
    /// Per-image outcomes.
    pub report: RomReport,
}

/// Assembles every region of `table` from `source`.
///
/// # Errors
///
/// Returns a [`RomError`] when a region is declared twice, a placement or
/// fill lies outside its region, a required image is absent, an image has the
/// wrong size, or (under [`IntegrityPolicy::Strict`]) a required image's
/// digest differs.
pub fn load_rom_table(
    table: &RomTable,
    source: &dyn RomSource,
    options: &RomLoadOptions,
) -> Result<LoadedRoms, RomError> {
    let mut seen = BTreeSet::new();
    let mut regions = Vec::with_capacity(table.regions.len());
    let mut report = RomReport::default();

    for spec in &table.regions {
        if !seen.insert(spec.name.as_str()) {
            return Err(RomError::DuplicateRegion {
                region: spec.name.clone(),
            });
        }
        let mut data = vec![spec.fill; spec.size];
        for file in &spec.files {
            let status = load_file(spec, file, source, options, &mut data)?;
            report.files.push(RomFileReport {
                region: spec.name.clone(),
                file: file.name.clone(),
                status,
            });
        }
        for fill in &spec.fills {
            let slot = data
                .get_mut(fill.offset as usize)
                .ok_or_else(|| RomError::FillOutOfRange {
                    region: spec.name.clone(),
                    offset: fill.offset,
                })?;
            *slot = fill.value;
        }
        debug!(region = %spec.name, size = spec.size, files = spec.files.len(), "rom region assembled");
        regions.push(MemoryBlock::from_bytes(&spec.name, data, MemoryLayout::BYTES));
    }
    Ok(LoadedRoms { regions, report })
}

fn load_file(
    region: &RomRegionSpec,
    file: &RomFileSpec,
    source: &dyn RomSource,
    options: &RomLoadOptions,
    data: &mut [u8],
) -> Result<RomStatus, RomError> {
    let expected = file.expected_digest()?;
    let start = file.offset as usize;
    let fits = start
        .checked_add(file.load.footprint(file.length))
        .is_some_and(|end| end <= data.len());
    if !fits {
        return Err(RomError::LayoutOutOfRange {
            region: region.name.clone(),
            file: file.name.clone(),
            offset: file.offset,
        });
    }

    let Some(image) = source.fetch(file)? else {
        if file.best_effort {
            warn!(region = %region.name, file = %file.name, "optional rom image not found");
            return Ok(RomStatus::Missing);
        }
        return Err(RomError::Missing {
            region: region.name.clone(),
            file: file.name.clone(),
        });
    };
    if image.len() != file.length {
        return Err(RomError::SizeMismatch {
            file: file.name.clone(),
            expected: file.length,
            actual: image.len(),
        });
    }

    let actual = RomDigest::of(&image);
    let status = if actual == expected {
        RomStatus::Good
    } else if options.policy == IntegrityPolicy::Strict && !file.best_effort {
        return Err(RomError::ChecksumMismatch {
            file: file.name.clone(),
            expected_crc32: expected.crc32,
            expected_sha1: expected.sha1_hex(),
            actual_crc32: actual.crc32,
            actual_sha1: actual.sha1_hex(),
        });
    } else {
        warn!(
            region = %region.name,
            file = %file.name,
            expected = ?expected,
            actual = ?actual,
            "rom image checksum mismatch"
        );
        RomStatus::BadChecksum { actual }
    };

    for (slot, byte) in data[start..]
        .iter_mut()
        .step_by(file.load.stride())
        .zip(image)
    {
        *slot = byte;
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::{
        load_rom_table, IntegrityPolicy, MemorySource, RomDigest, RomFileSpec, RomLoadOptions,
        RomRegionSpec, RomStatus, RomTable,
    };
    use crate::RomError;

    fn spec_for(name: &str, offset: u32, data: &[u8]) -> RomFileSpec {
        let digest = RomDigest::of(data);
        RomFileSpec::new(name, offset, data.len(), digest.crc32, &digest.sha1_hex())
    }

    #[test]
    fn digests_match_known_vectors() {
        let digest = RomDigest::of(b"abc");
        assert_eq!(digest.crc32, 0x3524_41C2);
        assert_eq!(digest.sha1_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn interleaved_pairs_form_big_endian_words() {
        let even = [0x12, 0x56];
        let odd = [0x34, 0x78];
        let table = RomTable::new().region(
            RomRegionSpec::new("maincpu", 8)
                .with_fill_byte(0xFF)
                .file(spec_for("even", 0, &even).interleaved())
                .file(spec_for("odd", 1, &odd).interleaved())
                .fill_at(7, 0x00),
        );
        let source = MemorySource::new()
            .with("even", even.to_vec())
            .with("odd", odd.to_vec());
        let loaded =
            load_rom_table(&table, &source, &RomLoadOptions::default()).expect("table loads");
        assert_eq!(
            loaded.regions[0].as_bytes(),
            &[0x12, 0x34, 0x56, 0x78, 0xFF, 0xFF, 0xFF, 0x00]
        );
        assert!(loaded.report.is_clean());
    }

    #[test]
    fn strict_and_degraded_policies_differ_on_mismatch() {
        let good = [1_u8, 2, 3, 4];
        let table = RomTable::new()
            .region(RomRegionSpec::new("data", 4).file(spec_for("data.bin", 0, &good)));
        let source = MemorySource::new().with("data.bin", vec![1, 2, 3, 5]);

        let strict = load_rom_table(&table, &source, &RomLoadOptions::default());
        assert!(matches!(strict, Err(RomError::ChecksumMismatch { .. })));

        let degraded = RomLoadOptions {
            policy: IntegrityPolicy::Degraded,
        };
        let loaded = load_rom_table(&table, &source, &degraded).expect("degraded load");
        assert!(matches!(
            loaded.report.files()[0].status,
            RomStatus::BadChecksum { .. }
        ));
        assert_eq!(loaded.regions[0].as_bytes(), &[1, 2, 3, 5]);
    }

    #[test]
    fn missing_images_fail_unless_best_effort() {
        let image = [9_u8; 4];
        let required = RomTable::new()
            .region(RomRegionSpec::new("data", 4).file(spec_for("gone.bin", 0, &image)));
        let optional = RomTable::new().region(
            RomRegionSpec::new("data", 4)
                .with_fill_byte(0xAA)
                .file(spec_for("gone.bin", 0, &image).best_effort()),
        );
        let source = MemorySource::new();
        let options = RomLoadOptions::default();

        assert!(matches!(
            load_rom_table(&required, &source, &options),
            Err(RomError::Missing { .. })
        ));
        let loaded = load_rom_table(&optional, &source, &options).expect("optional image");
        assert_eq!(loaded.report.problems().count(), 1);
        assert_eq!(loaded.regions[0].as_bytes(), &[0xAA; 4]);
    }

    #[test]
    fn table_shape_errors_are_reported() {
        let image = [0_u8; 4];
        let source = MemorySource::new().with("a.bin", image.to_vec());
        let options = RomLoadOptions::default();

        let too_far = RomTable::new()
            .region(RomRegionSpec::new("data", 6).file(spec_for("a.bin", 0, &image).interleaved()));
        assert!(matches!(
            load_rom_table(&too_far, &source, &options),
            Err(RomError::LayoutOutOfRange { .. })
        ));

        let wrong_size = RomTable::new().region(RomRegionSpec::new("data", 8).file(RomFileSpec {
            length: 8,
            ..spec_for("a.bin", 0, &image)
        }));
        assert!(matches!(
            load_rom_table(&wrong_size, &source, &options),
            Err(RomError::SizeMismatch { .. })
        ));

        let bad_fill = RomTable::new().region(RomRegionSpec::new("data", 2).fill_at(2, 1));
        assert!(matches!(
            load_rom_table(&bad_fill, &source, &options),
            Err(RomError::FillOutOfRange { .. })
        ));

        let twice = RomTable::new()
            .region(RomRegionSpec::new("data", 2))
            .region(RomRegionSpec::new("data", 2));
        assert!(matches!(
            load_rom_table(&twice, &source, &options),
            Err(RomError::DuplicateRegion { .. })
        ));

        let bad_digest = RomTable::new().region(
            RomRegionSpec::new("data", 4).file(RomFileSpec::new("a.bin", 0, 4, 0, "not-hex")),
        );
        assert!(matches!(
            load_rom_table(&bad_digest, &source, &options),
            Err(RomError::InvalidDigest { .. })
        ));
    }
}
