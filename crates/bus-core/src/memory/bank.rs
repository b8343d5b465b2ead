use super::RegionId;
use crate::{ConfigError, SnapshotError};

/// How an out-of-range bank selection is brought back into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BankPolicy {
    /// Selection wraps modulo the entry count.
    #[default]
    Mask,
    /// Selection saturates at the last entry.
    Clamp,
}

/// Declarative bank description: `entries` consecutive pages of `page_size`
/// bytes starting at `base` inside ROM region `region`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BankSpec {
    /// Bank name referenced by map entries.
    pub name: String,
    /// ROM region holding the pages.
    pub region: String,
    /// Offset of entry 0 inside the region.
    pub base: u32,
    /// Page size in bytes.
    pub page_size: u32,
    /// Number of selectable entries.
    pub entries: u32,
    /// Out-of-range selection policy.
    pub policy: BankPolicy,
}

impl BankSpec {
    /// Creates a bank description whose entry 0 starts at region offset 0.
    #[must_use]
    pub fn new(name: &str, region: &str, page_size: u32, entries: u32, policy: BankPolicy) -> Self {
        Self {
            name: name.to_owned(),
            region: region.to_owned(),
            base: 0,
            page_size,
            entries,
            policy,
        }
    }

    /// Moves entry 0 to `base`.
    #[must_use]
    pub const fn with_base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }
}

/// Resolved bank: a window whose contents follow the current entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    name: String,
    region: RegionId,
    base: u32,
    page_size: u32,
    entries: u32,
    policy: BankPolicy,
    current: u32,
}

impl Bank {
    pub(crate) fn new(
        spec: &BankSpec,
        region: RegionId,
        region_len: usize,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBank {
            bank: spec.name.clone(),
            reason,
        };
        if spec.entries == 0 || spec.page_size == 0 {
            return Err(invalid("entry count and page size must be non-zero".to_owned()));
        }
        let span =
            u64::from(spec.base) + u64::from(spec.entries) * u64::from(spec.page_size);
        if span > region_len as u64 {
            return Err(invalid(format!(
                "{} entries of {:#x} bytes from {:#x} exceed region `{}` ({:#x} bytes)",
                spec.entries, spec.page_size, spec.base, spec.region, region_len
            )));
        }
        Ok(Self {
            name: spec.name.clone(),
            region,
            base: spec.base,
            page_size: spec.page_size,
            entries: spec.entries,
            policy: spec.policy,
            current: 0,
        })
    }

    /// Bank name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region the pages live in.
    #[must_use]
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of selectable entries.
    #[must_use]
    pub const fn entries(&self) -> u32 {
        self.entries
    }

    /// Currently selected entry.
    #[must_use]
    pub const fn current(&self) -> u32 {
        self.current
    }

    /// Region offset of the current page.
    #[must_use]
    pub const fn page_offset(&self) -> u32 {
        self.base + self.current * self.page_size
    }

    /// Applies the bank policy to a raw selection and makes it current.
    pub fn select(&mut self, raw: u32) -> u32 {
        self.current = match self.policy {
            BankPolicy::Mask => raw % self.entries,
            BankPolicy::Clamp => raw.min(self.entries - 1),
        };
        self.current
    }

    /// Restores a recorded selection.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::BankOutOfRange`] for an index past the last entry.
    pub fn restore(&mut self, index: u32) -> Result<(), SnapshotError> {
        if index >= self.entries {
            return Err(SnapshotError::BankOutOfRange {
                name: self.name.clone(),
                index,
                entries: self.entries,
            });
        }
        self.current = index;
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Bank, BankPolicy, BankSpec};
    use crate::memory::RegionId;
    use rstest::rstest;

    fn bank(policy: BankPolicy) -> Bank {
        let spec = BankSpec::new("okibank", "oki", 0x10000, 16, policy);
        Bank::new(&spec, RegionId(0), 0x10_0000).expect("bank fits")
    }

    #[rstest]
    #[case(BankPolicy::Mask, 3, 3)]
    #[case(BankPolicy::Mask, 17, 1)]
    #[case(BankPolicy::Mask, 0xFF, 15)]
    #[case(BankPolicy::Clamp, 3, 3)]
    #[case(BankPolicy::Clamp, 17, 15)]
    #[case(BankPolicy::Clamp, u32::MAX, 15)]
    fn selection_never_leaves_the_entry_table(
        #[case] policy: BankPolicy,
        #[case] raw: u32,
        #[case] expected: u32,
    ) {
        let mut bank = bank(policy);
        assert_eq!(bank.select(raw), expected);
        assert_eq!(bank.page_offset(), expected * 0x10000);
    }

    #[test]
    fn oversized_bank_is_rejected() {
        let spec = BankSpec::new("okibank", "oki", 0x10000, 17, BankPolicy::Mask);
        assert!(Bank::new(&spec, RegionId(0), 0x10_0000).is_err());
        let zero = BankSpec::new("okibank", "oki", 0x10000, 0, BankPolicy::Mask);
        assert!(Bank::new(&zero, RegionId(0), 0x10_0000).is_err());
    }

    #[test]
    fn restore_rejects_indices_past_the_table() {
        let mut bank = bank(BankPolicy::Mask);
        assert!(bank.restore(15).is_ok());
        assert_eq!(bank.current(), 15);
        assert!(bank.restore(16).is_err());
        assert_eq!(bank.current(), 15);
    }
}
