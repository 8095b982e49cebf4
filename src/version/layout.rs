//! The immutable per-level file layout of one column family.

use super::FileRef;
use crate::error::{Error, Result};
use std::fmt;

/// A version represents the set of tables of a column family at a point in time.
///
/// Level 0 files may overlap and are kept newest first (largest sequence
/// number first). Files on every other level have disjoint key ranges and
/// are sorted by key. A Version is never modified after it is built.
pub struct Version {
    number: u64,
    levels: Vec<Vec<FileRef>>,
}

impl Version {
    /// Create a new empty version
    pub fn new(num_levels: usize) -> Self {
        Self { number: 0, levels: vec![Vec::new(); num_levels.max(1)] }
    }

    pub(crate) fn from_levels(number: u64, levels: Vec<Vec<FileRef>>) -> Self {
        Self { number, levels }
    }

    pub(crate) fn levels(&self) -> &[Vec<FileRef>] {
        &self.levels
    }

    /// Creation number, unique within the database.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Files on `level` in search order.
    pub fn files(&self, level: usize) -> &[FileRef] {
        self.levels.get(level).map_or(&[], |files| files.as_slice())
    }

    /// Number of files on `level`.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.files(level).len()
    }

    /// Get the total number of files
    pub fn num_files(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    /// Bytes stored on `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.file_size).sum()
    }

    /// Get the total size of all files
    pub fn total_size(&self) -> u64 {
        (0..self.levels.len()).map(|l| self.level_size(l)).sum()
    }

    /// Every file of every level.
    pub fn all_files(&self) -> impl Iterator<Item = &FileRef> {
        self.levels.iter().flatten()
    }

    /// Deepest level holding any file, if any.
    pub fn deepest_non_empty_level(&self) -> Option<usize> {
        self.levels.iter().rposition(|files| !files.is_empty())
    }

    /// Files on `level` that may hold `key`, in search order.
    pub fn files_for_key(&self, level: usize, key: &[u8]) -> Vec<&FileRef> {
        let files = self.files(level);
        if level == 0 {
            return files.iter().filter(|f| f.contains_key(key)).collect();
        }
        let idx = files.partition_point(|f| f.largest_key.as_slice() < key);
        match files.get(idx) {
            Some(f) if f.smallest_key.as_slice() <= key => vec![f],
            _ => Vec::new(),
        }
    }

    /// Files on `level` whose range intersects `[begin, end]`.
    pub fn overlapping_files(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Vec<FileRef> {
        self.files(level).iter().filter(|f| f.overlaps(begin, end)).cloned().collect()
    }

    /// True if any level deeper than `level` holds data in `[begin, end]`.
    pub fn overlaps_below(&self, level: usize, begin: &[u8], end: &[u8]) -> bool {
        (level + 1..self.levels.len()).any(|l| self.files(l).iter().any(|f| f.overlaps(Some(begin), Some(end))))
    }

    /// Verifies the ordering rules of every level.
    pub fn check_consistency(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (level, files) in self.levels.iter().enumerate() {
            for f in files {
                if f.level != level {
                    return Err(Error::corruption(format!("file {} recorded at level {} found on level {}", f.number, f.level, level)));
                }
                if f.smallest_key > f.largest_key {
                    return Err(Error::corruption(format!("file {} has an inverted key range", f.number)));
                }
                if !seen.insert(f.number) {
                    return Err(Error::corruption(format!("file {} listed twice", f.number)));
                }
            }
            if level == 0 {
                continue;
            }
            for pair in files.windows(2) {
                if pair[0].largest_key >= pair[1].smallest_key {
                    return Err(Error::corruption(format!(
                        "overlapping files {} and {} on level {}",
                        pair[0].number, pair[1].number, level
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<usize> = self.levels.iter().map(|l| l.len()).collect();
        f.debug_struct("Version").field("number", &self.number).field("files_per_level", &counts).finish()
    }
}
