//! The stateful reader: owns a reader-info slot so the writer can detect
//! backpressure against it, on top of the stateless read walk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::copy_confirm::CopyConfirm;
use crate::error::RmpError;
use crate::reader::{ReadOutcome, StatelessReader};
use crate::reader_info::ReaderInfoTable;
use crate::ring::ByteRing;

/// Holds the ring and its reader-info table by `Arc` so a reader can be
/// handed to a background queue (see `toroni-tp`'s channel reader) without
/// tying it to a lifetime.
pub struct BackpressureReader {
    ring: Arc<ByteRing>,
    readers: Arc<ReaderInfoTable>,
    slot_id: u16,
    local_pos: AtomicU64,
    active: bool,
}

impl BackpressureReader {
    /// Reserves a reader-info slot. Fails if every slot is currently held.
    pub fn new(ring: Arc<ByteRing>, readers: Arc<ReaderInfoTable>) -> Result<Self, RmpError> {
        let slot_id = readers
            .alloc()
            .ok_or_else(|| RmpError::ReaderSlotExhausted(readers.name().to_string()))?;
        Ok(Self {
            ring,
            readers,
            slot_id,
            local_pos: AtomicU64::new(0),
            active: false,
        })
    }

    /// Starts this reader at the ring's current tail — it will only see
    /// messages written from this point on.
    pub fn activate(&mut self) {
        let free_pos = self.ring.free_pos().load(Ordering::Acquire);
        self.local_pos.store(free_pos, Ordering::Relaxed);
        self.readers.activate(self.slot_id, free_pos);
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.readers.deactivate(self.slot_id);
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn slot_id(&self) -> u16 {
        self.slot_id
    }

    pub fn read_ex(&self, handler: &mut dyn CopyConfirm) -> ReadOutcome {
        assert!(self.active, "read_ex called on an inactive reader");
        let bpos = self.readers.position_atomic(self.slot_id);
        let outcome = StatelessReader::new(&self.ring).read_ex(&self.local_pos, bpos, handler);
        if outcome == ReadOutcome::ExpiredPosition {
            self.readers.expired_readers().fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }
}

impl Drop for BackpressureReader {
    fn drop(&mut self) {
        if self.active {
            self.readers.deactivate(self.slot_id);
        }
        self.readers.free(self.slot_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy_confirm::CopyAll;
    use crate::ring::RingConfig;
    use crate::writer::Writer;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_name(tag: &str) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        format!("/toroni_test_readerbp_{tag}_{ts}")
    }

    #[test]
    fn backpressure_detected_against_active_slow_reader() {
        let name = unique_name("bp");
        let ring = Arc::new(ByteRing::create_or_open(&name, RingConfig::new(1024)).unwrap());
        let readers = Arc::new(ReaderInfoTable::create_or_open(&format!("{name}_r"), 4).unwrap());

        let mut reader = BackpressureReader::new(Arc::clone(&ring), Arc::clone(&readers)).unwrap();
        reader.activate();

        let writer = Writer::new(Arc::clone(&ring), Arc::clone(&readers));
        let big = vec![0xAAu8; 512];

        let mut bp_seen = false;
        writer.write_ex(&big, &mut |_, _| false);
        writer.write_ex(&big, &mut |_, _| {
            bp_seen = true;
            false
        });

        assert!(bp_seen);
        assert_eq!(ring.backpressure_count().load(Ordering::Relaxed), 1);

        // Reader never drains, so it's now expired; the next write must not
        // invoke the handler again for this already-dead reader.
        let mut bp_seen_again = false;
        writer.write_ex(&big, &mut |_, _| {
            bp_seen_again = true;
            false
        });
        assert!(!bp_seen_again);

        let outcome = reader.read_ex(&mut CopyAll::new(|_| {}));
        assert_eq!(outcome, ReadOutcome::ExpiredPosition);
        assert_eq!(readers.expired_readers().load(Ordering::Relaxed), 1);

        toroni_sys::SharedRegion::unlink(&name).unwrap();
        toroni_sys::SharedRegion::unlink(&format!("{name}_r")).unwrap();
    }
}
