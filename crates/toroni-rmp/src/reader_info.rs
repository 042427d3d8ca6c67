//! The reader-info table: one fixed-size array of slots, shared by every
//! process attached to a ring, tracking which readers are currently active
//! and how far behind each one has published its position.
//!
//! A slot's lifecycle is driven entirely by its own robust mutex: a process
//! claims a slot by `try_lock`ing it ([`ReaderInfoTable::alloc`]) and
//! releases it by unlocking ([`ReaderInfoTable::free`]). If that process
//! dies while holding the lock, the mutex's owner-death recovery (see
//! [`toroni_sys::robust_mutex`]) makes the slot claimable again on the next
//! `alloc` scan — no separate liveness check is needed.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use toroni_sys::{RobustProcMutex, SharedRegion};

use crate::error::RmpError;

const ATTACH_RETRIES: u32 = 400;
const ATTACH_RETRY_SLEEP: Duration = Duration::from_millis(5);

/// Returned by [`ReaderInfoTable::alloc`] when every slot is held.
pub const INVALID_SLOT: u16 = u16::MAX;

#[repr(C)]
struct Slot {
    lock: RobustProcMutex,
    position: AtomicU64,
    is_active: AtomicU8,
}

#[repr(C)]
struct TableHeader {
    expired_readers: AtomicU64,
    initialized: AtomicBool,
    max_readers: AtomicU16,
    /// Packed `(min << 16) | (max_exclusive)` over currently-active slot
    /// indices. An over-approximation: every active slot's index falls in
    /// `[min, max_exclusive)`, but not every index in that window need be
    /// active.
    active_range: AtomicU32,
}

fn pack_range(min: u16, max_exclusive: u16) -> u32 {
    ((min as u32) << 16) | (max_exclusive as u32)
}

fn unpack_range(packed: u32) -> (u16, u16) {
    let min = (packed >> 16) as u16;
    let max_exclusive = (packed & 0xFFFF) as u16;
    (min, max_exclusive)
}

fn header_size() -> usize {
    std::mem::size_of::<TableHeader>()
}

fn slot_size() -> usize {
    std::mem::size_of::<Slot>()
}

pub fn region_size(max_readers: u16) -> usize {
    header_size() + slot_size() * max_readers as usize
}

pub struct ReaderInfoTable {
    region: SharedRegion,
    max_readers: u16,
    name: String,
}

impl ReaderInfoTable {
    pub fn create_or_open(name: &str, max_readers: u16) -> Result<Self, RmpError> {
        let mut region = SharedRegion::create_or_open(name, region_size(max_readers), 0o600)?;
        let creator = region.is_creator();
        let header_ptr = region.ptr_mut() as *mut TableHeader;

        if creator {
            unsafe {
                (*header_ptr).expired_readers = AtomicU64::new(0);
                (*header_ptr).max_readers = AtomicU16::new(max_readers);
                (*header_ptr).active_range = AtomicU32::new(pack_range(0, 0));

                let base = region.ptr_mut().add(header_size());
                for i in 0..max_readers {
                    let slot_ptr = (base as *mut Slot).add(i as usize);
                    RobustProcMutex::init_in_place(&raw mut (*slot_ptr).lock);
                    (*slot_ptr).position = AtomicU64::new(0);
                    (*slot_ptr).is_active = AtomicU8::new(0);
                }

                (*header_ptr).initialized.store(true, Ordering::Release);
            }
            tracing::info!(name, max_readers, "created reader-info table");
        } else {
            Self::wait_until_initialized(header_ptr, name)?;
            let observed = unsafe { (*header_ptr).max_readers.load(Ordering::Acquire) };
            assert_eq!(
                observed, max_readers,
                "reader-info table '{name}' was created with {observed} slots, not {max_readers}"
            );
            tracing::info!(name, "attached to reader-info table");
        }

        Ok(Self {
            region,
            max_readers,
            name: name.to_string(),
        })
    }

    fn wait_until_initialized(header_ptr: *const TableHeader, name: &str) -> Result<(), RmpError> {
        let initialized = unsafe { &(*header_ptr).initialized };
        for _ in 0..ATTACH_RETRIES {
            if initialized.load(Ordering::Acquire) {
                return Ok(());
            }
            std::thread::sleep(ATTACH_RETRY_SLEEP);
        }
        Err(RmpError::Uninitialized(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_readers(&self) -> u16 {
        self.max_readers
    }

    #[inline]
    fn header(&self) -> &TableHeader {
        unsafe { &*(self.region.ptr() as *const TableHeader) }
    }

    #[inline]
    fn slot(&self, slot_id: u16) -> &Slot {
        assert!(slot_id < self.max_readers, "reader slot index out of range");
        unsafe {
            let base = self.region.ptr().add(header_size());
            &*(base as *const Slot).add(slot_id as usize)
        }
    }

    pub fn expired_readers(&self) -> &AtomicU64 {
        &self.header().expired_readers
    }

    /// Claims the first slot whose lock can be acquired without blocking.
    /// Clears any stale activation state left by a previous (possibly dead)
    /// owner before returning it.
    pub fn alloc(&self) -> Option<u16> {
        for i in 0..self.max_readers {
            if self.slot(i).lock.try_lock() {
                self.deactivate(i);
                return Some(i);
            }
        }
        None
    }

    /// Releases a previously allocated slot.
    pub fn free(&self, slot_id: u16) {
        self.deactivate(slot_id);
        self.slot(slot_id).lock.unlock();
    }

    pub fn activate(&self, slot_id: u16, pos: u64) {
        let slot = self.slot(slot_id);
        slot.position.store(pos, Ordering::Release);
        slot.is_active.store(1, Ordering::Release);
        self.update_active_range();
    }

    pub fn deactivate(&self, slot_id: u16) {
        self.slot(slot_id).is_active.store(0, Ordering::Release);
        self.update_active_range();
    }

    pub fn is_active(&self, slot_id: u16) -> bool {
        self.slot(slot_id).is_active.load(Ordering::Acquire) != 0
    }

    pub fn position(&self, slot_id: u16) -> u64 {
        self.slot(slot_id).position.load(Ordering::Acquire)
    }

    /// The raw atomic backing a slot's published position, for a stateful
    /// reader that wants to store directly without going through
    /// [`Self::activate`] (which also recomputes the active range).
    pub fn position_atomic(&self, slot_id: u16) -> &AtomicU64 {
        &self.slot(slot_id).position
    }

    pub fn active_range(&self) -> (u16, u16) {
        unpack_range(self.header().active_range.load(Ordering::Acquire))
    }

    /// Rescans every slot and installs the resulting `(min, max_exclusive)`
    /// window, retrying if a concurrent update raced ahead of us. The
    /// rescan, not the retry, is what keeps this correct: a CAS retry on a
    /// stale computed value would just reinstall stale data.
    fn update_active_range(&self) {
        loop {
            let mut min: u16 = u16::MAX;
            let mut max_exclusive: u16 = 0;
            for i in 0..self.max_readers {
                if self.slot(i).is_active.load(Ordering::Acquire) != 0 {
                    min = min.min(i);
                    max_exclusive = max_exclusive.max(i + 1);
                }
            }
            if min == u16::MAX {
                min = 0;
                max_exclusive = 0;
            }
            let new_packed = pack_range(min, max_exclusive);
            let current = self.header().active_range.load(Ordering::Acquire);
            if self
                .header()
                .active_range
                .compare_exchange(current, new_packed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_name(tag: &str) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        format!("/toroni_test_readerinfo_{tag}_{ts}")
    }

    #[test]
    fn alloc_free_roundtrip() {
        let name = unique_name("alloc_free");
        let table = ReaderInfoTable::create_or_open(&name, 4).unwrap();

        let a = table.alloc().unwrap();
        let b = table.alloc().unwrap();
        assert_ne!(a, b);

        table.activate(a, 10);
        assert!(table.is_active(a));
        assert_eq!(table.position(a), 10);

        let (min, max_excl) = table.active_range();
        assert!(min <= a && a < max_excl);

        table.free(a);
        assert!(!table.is_active(a));
        table.free(b);

        toroni_sys::SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn alloc_exhausts_and_frees() {
        let name = unique_name("exhaust");
        let table = ReaderInfoTable::create_or_open(&name, 2).unwrap();

        let a = table.alloc().unwrap();
        let b = table.alloc().unwrap();
        assert!(table.alloc().is_none());

        table.free(a);
        let c = table.alloc().unwrap();
        assert_eq!(c, a);

        table.free(b);
        table.free(c);
        toroni_sys::SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn active_range_tracks_min_and_max() {
        let name = unique_name("range");
        let table = ReaderInfoTable::create_or_open(&name, 8).unwrap();

        let slots: Vec<u16> = (0..4).map(|_| table.alloc().unwrap()).collect();
        table.activate(slots[2], 0);
        table.activate(slots[3], 0);
        let (min, max_excl) = table.active_range();
        assert_eq!(min, slots[2].min(slots[3]));
        assert_eq!(max_excl, slots[2].max(slots[3]) + 1);

        for s in &slots {
            table.free(*s);
        }
        let (min, max_excl) = table.active_range();
        assert_eq!((min, max_excl), (0, 0));

        toroni_sys::SharedRegion::unlink(&name).unwrap();
    }
}
