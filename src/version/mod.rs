//! Version management.
//!
//! A [`Version`] is an immutable snapshot of the per-level file layout of one
//! column family. New versions are derived by applying a [`VersionEdit`] with
//! a [`VersionBuilder`]; the [`VersionSet`] persists every edit to the
//! manifest before publishing. Readers reach the current Version through a
//! [`SuperVersion`], which also pins the memtables that were live with it.

mod builder;
mod edit;
pub(crate) mod file_meta;
mod layout;
mod manifest;
mod set;
mod super_version;

pub use builder::VersionBuilder;
pub use edit::VersionEdit;
pub use file_meta::{FileHandle, FileMetaData, FileRef};
pub use layout::Version;
pub use manifest::{read_manifest, ManifestEnd, ManifestLog, ManifestWriter};
pub(crate) use set::{VersionSet, VersionSetOptions};
pub use super_version::{SuperVersion, SuperVersionManager};
