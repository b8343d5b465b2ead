use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{RomFileSpec, RomTable};
use crate::RomError;

/// Supplier of ROM images.
pub trait RomSource {
    /// Returns the image for `file`, or `None` when the source does not have it.
    ///
    /// # Errors
    ///
    /// Returns [`RomError::Io`] when the backing store fails.
    fn fetch(&self, file: &RomFileSpec) -> Result<Option<Vec<u8>>, RomError>;
}

/// Images stored as files in one directory.
///
/// Lookup is by file name first; when no file carries the name, any file with
/// the expected size and CRC32 is used instead, so renamed dumps still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Reads images from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory being searched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan_by_content(&self, file: &RomFileSpec) -> Result<Option<Vec<u8>>, RomError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RomError::Io { path, source }
        };
        let entries = fs::read_dir(&self.root).map_err(io(&self.root))?;
        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io(&self.root))?;
            let path = entry.path();
            let len = entry.metadata().map_err(io(&path))?.len();
            if path.is_file() && usize::try_from(len).is_ok_and(|len| len == file.length) {
                candidates.push(path);
            }
        }
        candidates.sort();
        for path in candidates {
            let data = fs::read(&path).map_err(io(&path))?;
            if crc32fast::hash(&data) == file.crc32 {
                debug!(file = %file.name, path = %path.display(), "rom image found by content");
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

impl RomSource for DirectorySource {
    fn fetch(&self, file: &RomFileSpec) -> Result<Option<Vec<u8>>, RomError> {
        let path = self.root.join(&file.name);
        if path.is_file() {
            return fs::read(&path)
                .map(Some)
                .map_err(|source| RomError::Io { path, source });
        }
        self.scan_by_content(file)
    }
}

/// Images held in memory, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MemorySource {
    images: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            images: BTreeMap::new(),
        }
    }

    /// Supplies every image of `table` as `fill` bytes of the declared length.
    ///
    /// Digests will not match; load such a source under
    /// [`super::IntegrityPolicy::Degraded`] to exercise a board without dumps.
    #[must_use]
    pub fn blank_for(table: &RomTable, fill: u8) -> Self {
        let mut source = Self::new();
        for (_, file) in table.files() {
            source.insert(&file.name, vec![fill; file.length]);
        }
        source
    }

    /// Adds an image.
    #[must_use]
    pub fn with(mut self, name: &str, data: Vec<u8>) -> Self {
        self.insert(name, data);
        self
    }

    /// Adds or replaces an image.
    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.images.insert(name.to_owned(), data);
    }

    /// Mutable access to a stored image.
    pub fn image_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.images.get_mut(name)
    }
}

impl RomSource for MemorySource {
    fn fetch(&self, file: &RomFileSpec) -> Result<Option<Vec<u8>>, RomError> {
        let by_name = self.images.get(&file.name);
        let by_content = || {
            self.images
                .values()
                .find(|data| data.len() == file.length && crc32fast::hash(data) == file.crc32)
        };
        Ok(by_name.or_else(by_content).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{DirectorySource, MemorySource, RomSource};
    use crate::rom::{RomDigest, RomFileSpec};

    fn spec(name: &str, data: &[u8]) -> RomFileSpec {
        let digest = RomDigest::of(data);
        RomFileSpec::new(name, 0, data.len(), digest.crc32, &digest.sha1_hex())
    }

    #[test]
    fn directory_source_finds_by_name_then_content() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("prog.bin"), [1_u8, 2, 3]).expect("write image");
        fs::write(dir.path().join("renamed.bin"), [7_u8, 8, 9, 10]).expect("write image");
        let source = DirectorySource::new(dir.path());

        assert_eq!(
            source.fetch(&spec("prog.bin", &[1, 2, 3])).expect("readable"),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            source.fetch(&spec("original.bin", &[7, 8, 9, 10])).expect("readable"),
            Some(vec![7, 8, 9, 10])
        );
        assert_eq!(source.fetch(&spec("absent.bin", &[0; 5])).expect("readable"), None);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = DirectorySource::new(dir.path().join("nope"));
        assert!(source.fetch(&spec("a.bin", &[1])).is_err());
    }

    #[test]
    fn memory_source_matches_crc_when_name_differs() {
        let source = MemorySource::new().with("other", vec![5, 6]);
        assert_eq!(
            source.fetch(&spec("wanted", &[5, 6])).expect("in memory"),
            Some(vec![5, 6])
        );
        assert_eq!(source.fetch(&spec("wanted", &[5, 7])).expect("in memory"), None);
    }
}
