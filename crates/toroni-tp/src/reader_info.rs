//! Wraps an RMP reader-info table with a generation counter, shared
//! alongside it in its own small region so it survives independently of
//! any one process's attach lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use toroni_rmp::ReaderInfoTable;
use toroni_sys::SharedRegion;

use crate::error::TpError;

struct GenerationCounter {
    region: SharedRegion,
}

impl GenerationCounter {
    fn create_or_open(name: &str) -> Result<Self, TpError> {
        let region = SharedRegion::create_or_open(name, std::mem::size_of::<AtomicU64>(), 0o600)?;
        Ok(Self { region })
    }

    /// Safe because `region`'s bytes are zero-initialized by the creator
    /// and `AtomicU64`'s bit pattern for zero is a valid `0u64`.
    fn atomic(&self) -> &AtomicU64 {
        unsafe { &*(self.region.ptr() as *const AtomicU64) }
    }
}

/// Backs one topic bus's subscriber bookkeeping: the underlying RMP
/// reader-info table (one slot per process's stateful reader, shared with
/// the writer for backpressure accounting) plus a monotonic generation
/// counter stamped into every outgoing message.
pub struct TopicReaderInfo {
    readers: Arc<ReaderInfoTable>,
    generation: GenerationCounter,
}

impl TopicReaderInfo {
    pub fn create_or_open(name: &str, max_readers: u16) -> Result<Self, TpError> {
        let readers = Arc::new(ReaderInfoTable::create_or_open(name, max_readers)?);
        let generation = GenerationCounter::create_or_open(&format!("{name}_gen"))?;
        Ok(Self { readers, generation })
    }

    pub fn readers(&self) -> &ReaderInfoTable {
        &self.readers
    }

    /// A clone of the underlying `Arc`, for callers (the async writer, the
    /// topic reader) that need to hand ownership to `toroni_rmp::Writer` or
    /// `toroni_rmp::BackpressureReader` without tying it to a borrow.
    pub fn readers_arc(&self) -> Arc<ReaderInfoTable> {
        Arc::clone(&self.readers)
    }

    /// The generation a newly-created subscriber should capture as its
    /// cutoff: it will accept this value and anything stamped later, but
    /// nothing that predates it.
    pub fn current_generation(&self) -> u64 {
        self.generation.atomic().load(Ordering::Acquire)
    }

    /// Stamps the next outgoing message with the current generation and
    /// advances the counter so subsequent subscribers see a higher cutoff.
    pub fn next_generation(&self) -> u64 {
        self.generation.atomic().fetch_add(1, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_name(tag: &str) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        format!("/toroni_test_tpreaderinfo_{tag}_{ts}")
    }

    #[test]
    fn generation_starts_at_zero_and_advances_per_message() {
        let name = unique_name("gen");
        let info = TopicReaderInfo::create_or_open(&name, 4).unwrap();

        assert_eq!(info.current_generation(), 0);
        assert_eq!(info.next_generation(), 0);
        assert_eq!(info.current_generation(), 1);
        assert_eq!(info.next_generation(), 1);
        assert_eq!(info.current_generation(), 2);

        SharedRegion::unlink(&name).unwrap();
        SharedRegion::unlink(&format!("{name}_gen")).unwrap();
    }

    #[test]
    fn attacher_observes_the_creators_generation() {
        let name = unique_name("gen_attach");
        let creator = TopicReaderInfo::create_or_open(&name, 4).unwrap();
        creator.next_generation();
        creator.next_generation();

        let attacher = TopicReaderInfo::create_or_open(&name, 4).unwrap();
        assert_eq!(attacher.current_generation(), 2);

        SharedRegion::unlink(&name).unwrap();
        SharedRegion::unlink(&format!("{name}_gen")).unwrap();
    }
}
