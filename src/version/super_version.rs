//! SuperVersions: the consistent {memtable, immutable memtables, Version}
//! bundle every read works against.
//!
//! Each column family has a [`SuperVersionManager`]. Readers call
//! [`acquire`](SuperVersionManager::acquire) and simply drop the returned
//! `Arc` when done. Each thread caches the SuperVersion it last acquired
//! from every manager; the cache is trusted only while its number matches
//! the manager's current number, and installs clear every thread's cache so
//! superseded bundles are not kept alive by idle threads.

use crate::memtable::{MemTable, MemTableListVersion};
use crate::version::Version;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

type LocalSlot = Mutex<Option<Arc<SuperVersion>>>;

thread_local! {
    static LOCAL_SUPER_VERSIONS: RefCell<HashMap<u64, Arc<LocalSlot>>> = RefCell::new(HashMap::new());
}

/// A published read view of one column family.
pub struct SuperVersion {
    /// Active memtable
    pub mem: Arc<MemTable>,
    /// Immutable memtables, newest first
    pub imm: Arc<MemTableListVersion>,
    /// Table files
    pub current: Arc<Version>,
    number: u64,
    obsolete: AtomicBool,
}

impl SuperVersion {
    /// Install number, increasing per column family.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// True once a newer SuperVersion has been installed.
    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SuperVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperVersion")
            .field("number", &self.number)
            .field("mem", &self.mem.id())
            .field("imm", &self.imm.len())
            .field("version", &self.current.number())
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}

/// Publishes and hands out the SuperVersions of one column family.
pub struct SuperVersionManager {
    id: u64,
    current: Mutex<Arc<SuperVersion>>,
    number: AtomicU64,
    slots: Mutex<Vec<Weak<LocalSlot>>>,
}

impl SuperVersionManager {
    /// Creates a manager whose first SuperVersion is built from the arguments.
    pub fn new(mem: Arc<MemTable>, imm: Arc<MemTableListVersion>, current: Arc<Version>) -> Self {
        let first = Arc::new(SuperVersion { mem, imm, current, number: 1, obsolete: AtomicBool::new(false) });
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            current: Mutex::new(first),
            number: AtomicU64::new(1),
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current SuperVersion.
    ///
    /// Served from this thread's cache when it is still current.
    pub fn acquire(&self) -> Arc<SuperVersion> {
        let current_number = self.number.load(Ordering::Acquire);
        let slot = self.local_slot();
        if let Some(sv) = slot.lock().as_ref() {
            if sv.number == current_number {
                return Arc::clone(sv);
            }
        }
        let sv = self.get_current();
        *slot.lock() = Some(Arc::clone(&sv));
        sv
    }

    /// Returns the current SuperVersion through the synchronized path.
    pub fn get_current(&self) -> Arc<SuperVersion> {
        Arc::clone(&self.current.lock())
    }

    /// Number of the current SuperVersion.
    pub fn current_number(&self) -> u64 {
        self.number.load(Ordering::Acquire)
    }

    /// Publishes a new SuperVersion and retires the previous one.
    ///
    /// Callers hold the column family's state lock, which serializes installs.
    pub fn install(
        &self,
        mem: Arc<MemTable>,
        imm: Arc<MemTableListVersion>,
        current: Arc<Version>,
    ) -> Arc<SuperVersion> {
        let number = self.number.load(Ordering::Acquire) + 1;
        let sv = Arc::new(SuperVersion { mem, imm, current, number, obsolete: AtomicBool::new(false) });
        let old = std::mem::replace(&mut *self.current.lock(), Arc::clone(&sv));
        self.number.store(number, Ordering::Release);
        self.scrape_local_caches();
        old.obsolete.store(true, Ordering::Release);
        log::debug!("Installed super version {} (version {})", number, sv.current.number());
        sv
    }

    fn local_slot(&self) -> Arc<LocalSlot> {
        LOCAL_SUPER_VERSIONS.with(|map| {
            let mut map = map.borrow_mut();
            if let Some(slot) = map.get(&self.id) {
                return Arc::clone(slot);
            }
            // Forget slots of managers that no longer exist
            map.retain(|_, slot| Arc::weak_count(slot) > 0);
            let slot: Arc<LocalSlot> = Arc::new(Mutex::new(None));
            self.slots.lock().push(Arc::downgrade(&slot));
            map.insert(self.id, Arc::clone(&slot));
            slot
        })
    }

    fn scrape_local_caches(&self) {
        let mut slots = self.slots.lock();
        slots.retain(|weak| match weak.upgrade() {
            Some(slot) => {
                slot.lock().take();
                true
            }
            None => false,
        });
    }
}

impl Drop for SuperVersionManager {
    fn drop(&mut self) {
        self.scrape_local_caches();
    }
}

impl fmt::Debug for SuperVersionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperVersionManager").field("number", &self.current_number()).finish()
    }
}
