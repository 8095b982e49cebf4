//! Applies edits to a Version without touching it.

use super::{FileHandle, FileRef, Version, VersionEdit};
use crate::error::{Error, Result};
use crossbeam::channel::Sender;

/// Accumulates edits on top of a base Version.
///
/// The base is never modified; unchanged files are shared with it.
pub struct VersionBuilder {
    levels: Vec<Vec<FileRef>>,
    purge_tx: Option<Sender<u64>>,
}

impl VersionBuilder {
    /// Starts from `base`.
    pub fn new(base: &Version, purge_tx: Option<Sender<u64>>) -> Self {
        Self { levels: base.levels().to_vec(), purge_tx }
    }

    /// Applies the file changes of `edit`: deletions first, then additions.
    pub fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        for &(level, number) in &edit.deleted_files {
            let files = self
                .levels
                .get_mut(level)
                .ok_or_else(|| Error::corruption(format!("edit deletes file {} from missing level {}", number, level)))?;
            let pos = files
                .iter()
                .position(|f| f.number == number)
                .ok_or_else(|| Error::corruption(format!("edit deletes unknown file {} on level {}", number, level)))?;
            files.remove(pos);
        }

        for meta in &edit.new_files {
            if meta.level >= self.levels.len() {
                return Err(Error::corruption(format!(
                    "file {} added to level {} beyond {} levels",
                    meta.number,
                    meta.level,
                    self.levels.len()
                )));
            }
            if self.contains(meta.number) {
                return Err(Error::corruption(format!("file {} added twice", meta.number)));
            }
            self.levels[meta.level].push(FileHandle::new(meta.clone(), self.purge_tx.clone()));
        }
        Ok(())
    }

    /// True if any level currently lists file `number`.
    pub fn contains(&self, number: u64) -> bool {
        self.levels.iter().flatten().any(|f| f.number == number)
    }

    /// Files currently listed, across levels.
    pub fn files(&self) -> impl Iterator<Item = &FileRef> {
        self.levels.iter().flatten()
    }

    /// Produces the new Version.
    pub fn build(mut self, number: u64) -> Result<Version> {
        if let Some(l0) = self.levels.first_mut() {
            l0.sort_by(|a, b| b.largest_seqno.cmp(&a.largest_seqno).then(b.number.cmp(&a.number)));
        }
        for files in self.levels.iter_mut().skip(1) {
            files.sort_by(|a, b| a.smallest_key.cmp(&b.smallest_key));
        }
        let version = Version::from_levels(number, self.levels);
        version.check_consistency()?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::file_meta::test_meta;
    use std::sync::Arc;

    #[test]
    fn test_build_orders_levels() {
        let base = Version::new(3);
        let mut edit = VersionEdit::new(0);
        edit.add_file(test_meta(1, 0, "a", "z", (1, 5)));
        edit.add_file(test_meta(2, 0, "a", "z", (6, 9)));
        edit.add_file(test_meta(3, 1, "m", "p", (1, 1)));
        edit.add_file(test_meta(4, 1, "a", "c", (1, 1)));

        let mut builder = VersionBuilder::new(&base, None);
        builder.apply(&edit).unwrap();
        let v = builder.build(1).unwrap();

        let l0: Vec<u64> = v.files(0).iter().map(|f| f.number).collect();
        assert_eq!(l0, vec![2, 1]);
        let l1: Vec<u64> = v.files(1).iter().map(|f| f.number).collect();
        assert_eq!(l1, vec![4, 3]);
        assert_eq!(base.num_files(), 0);
    }

    #[test]
    fn test_copy_on_write_shares_files() {
        let mut builder = VersionBuilder::new(&Version::new(2), None);
        let mut edit = VersionEdit::new(0);
        edit.add_file(test_meta(1, 0, "a", "c", (1, 1)));
        edit.add_file(test_meta(2, 0, "d", "f", (2, 2)));
        builder.apply(&edit).unwrap();
        let v1 = builder.build(1).unwrap();

        let mut builder = VersionBuilder::new(&v1, None);
        let mut edit = VersionEdit::new(0);
        edit.delete_file(0, 1);
        // Moving a file keeps its number
        edit.delete_file(0, 2);
        edit.add_file(test_meta(2, 1, "d", "f", (2, 2)));
        builder.apply(&edit).unwrap();
        let v2 = builder.build(2).unwrap();

        assert_eq!(v1.num_files(), 2);
        assert_eq!(v2.num_files_at_level(0), 0);
        assert_eq!(v2.files(1)[0].number, 2);
        assert!(!Arc::ptr_eq(&v1.files(0)[0], &v2.files(1)[0]));
    }

    #[test]
    fn test_invalid_edits() {
        let mut builder = VersionBuilder::new(&Version::new(2), None);
        let mut edit = VersionEdit::new(0);
        edit.delete_file(0, 9);
        assert!(builder.apply(&edit).unwrap_err().is_corruption());

        let mut edit = VersionEdit::new(0);
        edit.add_file(test_meta(1, 5, "a", "b", (1, 1)));
        assert!(builder.apply(&edit).is_err());

        let mut edit = VersionEdit::new(0);
        edit.add_file(test_meta(1, 0, "a", "b", (1, 1)));
        builder.apply(&edit).unwrap();
        assert!(builder.apply(&edit).is_err());
    }
}
