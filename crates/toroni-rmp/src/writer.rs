//! The single-writer side of the ring: framing, wrap handling, and reader
//! backpressure detection.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::frame::{FrameHeader, FrameType, HEADER_SIZE};
use crate::position::{buf_index, expired};
use crate::reader_info::ReaderInfoTable;
use crate::ring::ByteRing;

/// `(bp_pos, free_pos) -> keep_checking`. Returning `true` asks the writer
/// to retry the write with backpressure detection re-armed; `false` forces
/// the pending write through once, skipping the check for that attempt.
///
/// `bp_pos` is always passed as `0`, never the position of the reader that
/// actually triggered backpressure — this mirrors the original protocol's
/// handler signature, which exposes the parameter but never fills it in.
pub type BackpressureHandler<'a> = dyn FnMut(u64, u64) -> bool + 'a;

/// Holds the ring and its reader-info table by `Arc` rather than by
/// reference so a writer can be shared with a background drain thread
/// (see `toroni-tp`'s async writer) without tying it to a lifetime.
pub struct Writer {
    ring: Arc<ByteRing>,
    readers: Arc<ReaderInfoTable>,
}

impl Writer {
    pub fn new(ring: Arc<ByteRing>, readers: Arc<ReaderInfoTable>) -> Self {
        Self { ring, readers }
    }

    pub fn max_message_size(&self) -> u64 {
        self.ring.config().max_message_size()
    }

    /// Writes one message, handling ring-end wrap and reader backpressure.
    /// Blocks only for the duration of acquiring the ring's writer mutex.
    pub fn write_ex(&self, data: &[u8], bp_handler: &mut BackpressureHandler<'_>) {
        assert!(
            (data.len() as u64) <= self.max_message_size(),
            "message of {} bytes exceeds this ring's max message size of {}",
            data.len(),
            self.max_message_size()
        );

        let _guard = self.ring.writer_mutex().lock_guard();
        let ring_size = self.ring.config().ring_size;
        let mask = self.ring.config().mask();

        loop {
            let free_pos = self.ring.free_pos().load(Ordering::Relaxed);
            let idx = buf_index(free_pos, mask) as u64;
            let to_end = ring_size - idx;

            // A header needs HEADER_SIZE bytes to even describe itself; if
            // less than that remains before the ring wraps, those bytes are
            // unaddressable "blank" filler with no frame at all. Writing a
            // zero-length padding header there would violate the invariant
            // that every header has a non-zero length, so this case and the
            // exactly-header-sized case both fall through to blank.
            let needs_wrap = to_end < data.len() as u64 + HEADER_SIZE as u64;
            let writes_padding_header = needs_wrap && to_end > HEADER_SIZE as u64;
            let lead_in = if needs_wrap { to_end } else { 0 };
            let bytes_to_write = lead_in + HEADER_SIZE as u64 + data.len() as u64;

            if self.detect_backpressure(free_pos, bytes_to_write) {
                self.ring.backpressure_count().fetch_add(1, Ordering::Relaxed);
                if bp_handler(0, free_pos) {
                    continue;
                }
            }

            self.commit(free_pos, idx, lead_in, writes_padding_header, data);
            return;
        }
    }

    /// `true` iff writing `bytes_to_write` more bytes from `free_pos` would
    /// newly expire some reader that has not already expired.
    fn detect_backpressure(&self, free_pos: u64, bytes_to_write: u64) -> bool {
        let ring_size = self.ring.config().ring_size;
        let (min, max_exclusive) = self.readers.active_range();
        for slot in min..max_exclusive {
            if !self.readers.is_active(slot) {
                continue;
            }
            let reader_pos = self.readers.position(slot);
            if expired(reader_pos, free_pos, ring_size) {
                continue;
            }
            if expired(reader_pos, free_pos + bytes_to_write, ring_size) {
                return true;
            }
        }
        false
    }

    fn commit(
        &self,
        free_pos: u64,
        idx: u64,
        lead_in: u64,
        writes_padding_header: bool,
        data: &[u8],
    ) {
        let mask = self.ring.config().mask();
        let payload = unsafe { self.ring.payload_mut() };

        if writes_padding_header {
            let padding_len = (lead_in - HEADER_SIZE as u64) as u32;
            let header = FrameHeader::new(FrameType::Padding, padding_len);
            let mut buf = [0u8; HEADER_SIZE];
            header.encode_into(&mut buf);
            let at = idx as usize;
            payload[at..at + HEADER_SIZE].copy_from_slice(&buf);
        }

        let write_pos = free_pos + lead_in;
        let write_idx = buf_index(write_pos, mask);

        let header = FrameHeader::new(FrameType::Msg, data.len() as u32);
        let mut buf = [0u8; HEADER_SIZE];
        header.encode_into(&mut buf);
        payload[write_idx..write_idx + HEADER_SIZE].copy_from_slice(&buf);
        payload[write_idx + HEADER_SIZE..write_idx + HEADER_SIZE + data.len()].copy_from_slice(data);

        let new_free_pos = write_pos + HEADER_SIZE as u64 + data.len() as u64;
        // Release: publishes every byte stored above to any reader that
        // subsequently observes this new tail with an Acquire load.
        self.ring.free_pos().store(new_free_pos, Ordering::Release);
    }
}
