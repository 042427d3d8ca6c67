//! The byte ring: a shared-memory header plus `ring_size` payload bytes.
//!
//! The header is placement-constructed once, by whichever process happens to
//! create the backing [`toroni_sys::SharedRegion`]; every other attacher
//! busy-polls [`RingHeader::initialized`] until the creator finishes, then
//! only ever touches the header's fields through atomics or the writer
//! mutex's own locking protocol.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use toroni_sys::{RobustProcMutex, SharedRegion};

use crate::error::RmpError;
use crate::frame::HEADER_SIZE;

/// ASCII "TORNRING", used to catch a process attaching to the wrong region.
pub const RING_MAGIC: u64 = 0x544F_524E_5249_4E47;
pub const RING_VERSION: u64 = 1;

const ATTACH_RETRIES: u32 = 400;
const ATTACH_RETRY_SLEEP: Duration = Duration::from_millis(5);

/// Ring sizing: `ring_size` must be a power of two so that index arithmetic
/// can use a bitmask instead of a modulo.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub ring_size: u64,
}

impl RingConfig {
    pub fn new(ring_size: u64) -> Self {
        assert!(ring_size.is_power_of_two(), "ring size must be a power of two");
        Self { ring_size }
    }

    #[inline(always)]
    pub fn mask(&self) -> u64 {
        self.ring_size - 1
    }

    #[inline(always)]
    pub fn max_message_size(&self) -> u64 {
        self.ring_size - HEADER_SIZE as u64
    }
}

#[repr(C)]
struct RingHeader {
    magic: u64,
    version: u64,
    ring_size: u64,
    writer_mutex: RobustProcMutex,
    free_pos: AtomicU64,
    backpressure_count: AtomicU64,
    notification_count: AtomicU64,
    initialized: AtomicBool,
}

fn header_size() -> usize {
    std::mem::size_of::<RingHeader>()
}

pub fn region_size(ring_size: u64) -> usize {
    header_size() + ring_size as usize
}

/// A ring attached in this process — either its creator, or an attacher that
/// has confirmed the creator finished initializing it.
pub struct ByteRing {
    region: SharedRegion,
    config: RingConfig,
    name: String,
}

impl ByteRing {
    pub fn create_or_open(name: &str, config: RingConfig) -> Result<Self, RmpError> {
        let mut region = SharedRegion::create_or_open(name, region_size(config.ring_size), 0o600)?;
        let creator = region.is_creator();
        let header_ptr = region.ptr_mut() as *mut RingHeader;

        if creator {
            unsafe {
                RobustProcMutex::init_in_place(&raw mut (*header_ptr).writer_mutex);
                (*header_ptr).magic = RING_MAGIC;
                (*header_ptr).version = RING_VERSION;
                (*header_ptr).ring_size = config.ring_size;
                (*header_ptr).free_pos = AtomicU64::new(0);
                (*header_ptr).backpressure_count = AtomicU64::new(0);
                (*header_ptr).notification_count = AtomicU64::new(0);
                // Release: every field above must be visible to any process
                // that observes `initialized == true` with an Acquire load.
                (*header_ptr).initialized.store(true, Ordering::Release);
            }
            tracing::info!(name, ring_size = config.ring_size, "created byte ring");
        } else {
            Self::wait_until_initialized(header_ptr, name)?;
            let observed_size = unsafe { (*header_ptr).ring_size };
            assert_eq!(
                observed_size, config.ring_size,
                "ring '{name}' was created with a different ring size ({observed_size}) than requested ({})",
                config.ring_size
            );
            tracing::info!(name, "attached to byte ring");
        }

        Ok(Self {
            region,
            config,
            name: name.to_string(),
        })
    }

    fn wait_until_initialized(header_ptr: *const RingHeader, name: &str) -> Result<(), RmpError> {
        let initialized = unsafe { &(*header_ptr).initialized };
        for _ in 0..ATTACH_RETRIES {
            if initialized.load(Ordering::Acquire) {
                return Ok(());
            }
            std::thread::sleep(ATTACH_RETRY_SLEEP);
        }
        Err(RmpError::Uninitialized(name.to_string()))
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        unsafe { &*(self.region.ptr() as *const RingHeader) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> RingConfig {
        self.config
    }

    #[inline]
    pub fn writer_mutex(&self) -> &RobustProcMutex {
        &self.header().writer_mutex
    }

    #[inline]
    pub fn free_pos(&self) -> &AtomicU64 {
        &self.header().free_pos
    }

    #[inline]
    pub fn backpressure_count(&self) -> &AtomicU64 {
        &self.header().backpressure_count
    }

    #[inline]
    pub fn notification_count(&self) -> &AtomicU64 {
        &self.header().notification_count
    }

    /// The payload bytes, starting immediately after the header.
    pub fn payload(&self) -> &[u8] {
        unsafe {
            let ptr = self.region.ptr().add(header_size());
            std::slice::from_raw_parts(ptr, self.config.ring_size as usize)
        }
    }

    /// Mutable access to the payload bytes. Only the writer — which holds
    /// `writer_mutex` for the duration of every call — should use this.
    ///
    /// # Safety
    /// The caller must hold `writer_mutex` for the duration of the borrow;
    /// readers never call this.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn payload_mut(&self) -> &mut [u8] {
        unsafe {
            let ptr = self.region.ptr().add(header_size()) as *mut u8;
            std::slice::from_raw_parts_mut(ptr, self.config.ring_size as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_name(tag: &str) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        format!("/toroni_test_ring_{tag}_{ts}")
    }

    #[test]
    fn creator_initializes_free_pos_to_zero() {
        let name = unique_name("init");
        let ring = ByteRing::create_or_open(&name, RingConfig::new(1024)).unwrap();
        assert_eq!(ring.free_pos().load(Ordering::Acquire), 0);
        toroni_sys::SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn attacher_sees_creators_state() {
        let name = unique_name("attach");
        let creator = ByteRing::create_or_open(&name, RingConfig::new(1024)).unwrap();
        creator.free_pos().store(42, Ordering::Release);

        let attacher = ByteRing::create_or_open(&name, RingConfig::new(1024)).unwrap();
        assert_eq!(attacher.free_pos().load(Ordering::Acquire), 42);

        toroni_sys::SharedRegion::unlink(&name).unwrap();
    }
}
