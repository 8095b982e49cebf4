//! Column families: independent key spaces sharing one WAL and one manifest.
//!
//! Each column family owns its memtables, its current [`Version`] and its
//! [`SuperVersionManager`]. Every database has the `default` column family
//! with id 0; more can be created and dropped at runtime.

use crate::memtable::{MemTable, MemTableList};
use crate::version::{SuperVersion, SuperVersionManager, Version};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Id of the default column family.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// Name of the default column family.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// A client-side reference to a column family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnFamilyHandle {
    id: u32,
    name: String,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    /// Column family id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Column family name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Mutable state of a column family, guarded by its state lock.
pub(crate) struct CfState {
    pub mem: Arc<MemTable>,
    pub imm: MemTableList,
    pub current: Arc<Version>,
    /// WAL files below this number hold nothing unflushed for this family
    pub log_number: u64,
}

pub(crate) struct ColumnFamilyData {
    id: u32,
    name: String,
    state: Mutex<CfState>,
    super_versions: SuperVersionManager,
    flush_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    dropped: AtomicBool,
}

impl ColumnFamilyData {
    pub fn new(id: u32, name: impl Into<String>, mem: Arc<MemTable>, imm: MemTableList, current: Arc<Version>, log_number: u64) -> Arc<Self> {
        let super_versions = SuperVersionManager::new(Arc::clone(&mem), imm.current(), Arc::clone(&current));
        Arc::new(Self {
            id,
            name: name.into(),
            state: Mutex::new(CfState { mem, imm, current, log_number }),
            super_versions,
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle::new(self.id, self.name.clone())
    }

    pub fn lock_state(&self) -> MutexGuard<'_, CfState> {
        self.state.lock()
    }

    pub fn current_version(&self) -> Arc<Version> {
        Arc::clone(&self.state.lock().current)
    }

    pub fn super_versions(&self) -> &SuperVersionManager {
        &self.super_versions
    }

    /// Publishes the state in `state` as the new SuperVersion.
    ///
    /// `state` must be the guard of this family's state lock.
    pub fn install_super_version(&self, state: &CfState) -> Arc<SuperVersion> {
        self.super_versions.install(Arc::clone(&state.mem), state.imm.current(), Arc::clone(&state.current))
    }

    pub fn flush_lock(&self) -> MutexGuard<'_, ()> {
        self.flush_lock.lock()
    }

    pub fn compaction_lock(&self) -> MutexGuard<'_, ()> {
        self.compaction_lock.lock()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn set_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ColumnFamilyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dropped", &self.is_dropped())
            .finish()
    }
}
