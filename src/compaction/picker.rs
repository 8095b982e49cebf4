//! Compaction file picker.
//!
//! This module selects which files should be compacted based on the
//! Leveled Compaction strategy, and resolves the inputs of manual range
//! compactions.

use crate::config::Options;
use crate::version::{FileRef, Version};

/// A compaction task selected by the picker
#[derive(Debug, Clone)]
pub struct CompactionTask {
    /// Shallowest source level
    pub level: usize,
    /// Level the output is written to
    pub output_level: usize,
    /// Input files from levels above `output_level`
    pub inputs: Vec<FileRef>,
    /// Files of `output_level` overlapping the inputs
    pub output_inputs: Vec<FileRef>,
}

impl CompactionTask {
    /// Every input file.
    pub fn all_inputs(&self) -> impl Iterator<Item = &FileRef> {
        self.inputs.iter().chain(self.output_inputs.iter())
    }

    /// Total bytes read by the task.
    pub fn input_size(&self) -> u64 {
        self.all_inputs().map(|f| f.file_size).sum()
    }

    /// A single file with nothing to merge into can simply change level.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs.len() == 1 && self.output_inputs.is_empty() && self.level < self.output_level
    }
}

/// Picker for selecting files to compact
#[derive(Debug, Clone)]
pub struct CompactionPicker {
    /// Maximum number of levels
    max_levels: usize,
    level0_trigger: usize,
    level_targets: Vec<u64>,
}

impl CompactionPicker {
    /// Create a new compaction picker
    pub fn new(options: &Options) -> Self {
        let level_targets = (0..options.max_levels).map(|l| options.target_size_for_level(l)).collect();
        Self { max_levels: options.max_levels, level0_trigger: options.level0_compaction_threshold, level_targets }
    }

    /// True if some level is over its trigger.
    pub fn needs_compaction(&self, version: &Version) -> bool {
        self.level_to_compact(version).is_some()
    }

    fn level_to_compact(&self, version: &Version) -> Option<usize> {
        if version.num_files_at_level(0) >= self.level0_trigger {
            return Some(0);
        }
        (1..self.max_levels - 1).find(|&level| version.level_size(level) > self.level_targets[level])
    }

    /// Pick files for compaction
    ///
    /// Returns None if no compaction is needed
    pub fn pick_compaction(&self, version: &Version) -> Option<CompactionTask> {
        match self.level_to_compact(version)? {
            0 => self.pick_level0_compaction(version),
            level => self.pick_level_compaction(version, level),
        }
    }

    /// Level 0 files may overlap, so all of them go to Level 1 together
    fn pick_level0_compaction(&self, version: &Version) -> Option<CompactionTask> {
        let inputs: Vec<FileRef> = version.files(0).to_vec();
        if inputs.is_empty() {
            return None;
        }
        let (smallest, largest) = key_range(&inputs)?;
        let output_inputs = version.overlapping_files(1, Some(&smallest), Some(&largest));

        log::info!(
            "Picking Level 0 compaction: {} files at Level 0, {} overlapping at Level 1",
            inputs.len(),
            output_inputs.len()
        );
        Some(CompactionTask { level: 0, output_level: 1, inputs, output_inputs })
    }

    /// Level N files don't overlap, so a single file is pushed down
    fn pick_level_compaction(&self, version: &Version, level: usize) -> Option<CompactionTask> {
        let file = version.files(level).first()?.clone();
        let output_inputs =
            version.overlapping_files(level + 1, Some(&file.smallest_key), Some(&file.largest_key));

        log::info!(
            "Picking Level {} compaction: level size {} bytes over target {}",
            level,
            version.level_size(level),
            self.level_targets[level]
        );
        Some(CompactionTask { level, output_level: level + 1, inputs: vec![file], output_inputs })
    }

    /// Inputs for compacting `[begin, end]` into `output_level`.
    ///
    /// Every file on levels `0..=output_level` that overlaps the range is
    /// included, and the range grows with the inputs until no level holds a
    /// file that partially overlaps it.
    pub fn pick_range(
        &self,
        version: &Version,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        output_level: usize,
    ) -> Option<CompactionTask> {
        let mut lo = begin.map(<[u8]>::to_vec);
        let mut hi = end.map(<[u8]>::to_vec);
        let mut files: Vec<FileRef>;
        loop {
            files = (0..=output_level)
                .flat_map(|level| version.overlapping_files(level, lo.as_deref(), hi.as_deref()))
                .collect();
            let (smallest, largest) = key_range(&files)?;
            let new_lo = lo.as_ref().map(|b| b.clone().min(smallest));
            let new_hi = hi.as_ref().map(|e| e.clone().max(largest));
            if new_lo == lo && new_hi == hi {
                break;
            }
            lo = new_lo;
            hi = new_hi;
        }

        let (output_inputs, inputs): (Vec<FileRef>, Vec<FileRef>) =
            files.into_iter().partition(|f| f.level == output_level);
        let level = inputs.iter().chain(&output_inputs).map(|f| f.level).min()?;
        Some(CompactionTask { level, output_level, inputs, output_inputs })
    }
}

/// Smallest and largest user key over `files`.
pub fn key_range(files: &[FileRef]) -> Option<(Vec<u8>, Vec<u8>)> {
    let smallest = files.iter().map(|f| &f.smallest_key).min()?.clone();
    let largest = files.iter().map(|f| &f.largest_key).max()?.clone();
    Some((smallest, largest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::file_meta::test_meta;
    use crate::version::{VersionBuilder, VersionEdit};

    fn version_with(files: Vec<crate::version::FileMetaData>) -> Version {
        let mut edit = VersionEdit::new(0);
        for f in files {
            edit.add_file(f);
        }
        let mut builder = VersionBuilder::new(&Version::new(7), None);
        builder.apply(&edit).unwrap();
        builder.build(1).unwrap()
    }

    fn sized(mut meta: crate::version::FileMetaData, size: u64) -> crate::version::FileMetaData {
        meta.file_size = size;
        meta
    }

    #[test]
    fn test_pick_level0_compaction() {
        let picker = CompactionPicker::new(&Options::default());
        let version = version_with(vec![
            test_meta(1, 0, "a", "c", (1, 1)),
            test_meta(2, 0, "b", "d", (2, 2)),
            test_meta(3, 0, "c", "e", (3, 3)),
            test_meta(4, 0, "m", "p", (4, 4)),
            test_meta(5, 1, "a", "b", (0, 0)),
            test_meta(6, 1, "x", "z", (0, 0)),
        ]);

        let task = picker.pick_compaction(&version).unwrap();
        assert_eq!(task.level, 0);
        assert_eq!(task.output_level, 1);
        assert_eq!(task.inputs.len(), 4);
        let outputs: Vec<u64> = task.output_inputs.iter().map(|f| f.number).collect();
        assert_eq!(outputs, vec![5]);
        assert!(!task.is_trivial_move());
    }

    #[test]
    fn test_no_compaction_needed() {
        let picker = CompactionPicker::new(&Options::default());
        let version = version_with(vec![test_meta(1, 0, "a", "c", (1, 1)), test_meta(2, 0, "b", "d", (2, 2))]);
        assert!(!picker.needs_compaction(&version));
        assert!(picker.pick_compaction(&version).is_none());
    }

    #[test]
    fn test_pick_level1_compaction() {
        let picker = CompactionPicker::new(&Options::default());
        let big = 6 * 1024 * 1024;
        let version = version_with(vec![
            sized(test_meta(1, 1, "a", "c", (1, 1)), big),
            sized(test_meta(2, 1, "d", "f", (2, 2)), big),
            test_meta(3, 2, "b", "e", (0, 0)),
        ]);

        let task = picker.pick_compaction(&version).unwrap();
        assert_eq!(task.level, 1);
        assert_eq!(task.output_level, 2);
        assert_eq!(task.inputs[0].number, 1);
        assert_eq!(task.output_inputs[0].number, 3);
    }

    #[test]
    fn test_level0_priority() {
        let picker = CompactionPicker::new(&Options::default());
        let mut files: Vec<_> = (1..=4).map(|i| test_meta(i, 0, "a", "b", (i, i))).collect();
        files.push(sized(test_meta(9, 1, "a", "z", (0, 0)), 64 * 1024 * 1024));
        let task = picker.pick_compaction(&version_with(files)).unwrap();
        assert_eq!(task.level, 0, "Level 0 should be picked first");
    }

    #[test]
    fn test_trivial_move() {
        let picker = CompactionPicker::new(&Options::default().level0_compaction_threshold(1));
        let version = version_with(vec![test_meta(1, 0, "a", "c", (1, 1)), test_meta(2, 1, "x", "z", (0, 0))]);
        assert!(picker.pick_compaction(&version).unwrap().is_trivial_move());
    }

    #[test]
    fn test_pick_range_expands_to_stable_range() {
        let picker = CompactionPicker::new(&Options::default());
        let version = version_with(vec![
            test_meta(1, 0, "c", "f", (5, 5)),
            test_meta(2, 1, "a", "d", (1, 1)),
            test_meta(3, 1, "e", "g", (2, 2)),
            test_meta(4, 2, "g", "k", (0, 0)),
            test_meta(5, 2, "x", "z", (0, 0)),
        ]);

        let task = picker.pick_range(&version, Some(b"c"), Some(b"d"), 2).unwrap();
        let mut inputs: Vec<u64> = task.inputs.iter().map(|f| f.number).collect();
        inputs.sort();
        assert_eq!(inputs, vec![1, 2, 3]);
        let outputs: Vec<u64> = task.output_inputs.iter().map(|f| f.number).collect();
        assert_eq!(outputs, vec![4]);

        assert!(picker.pick_range(&version, Some(b"l"), Some(b"m"), 2).is_none());

        let all = picker.pick_range(&version, None, None, 2).unwrap();
        assert_eq!(all.all_inputs().count(), 5);
    }
}
