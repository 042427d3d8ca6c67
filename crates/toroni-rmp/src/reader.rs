//! The stateless read path: walk from a caller-owned position up to the
//! ring's current tail, skipping wrap filler and re-verifying expiration
//! around every delivered message.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::copy_confirm::CopyConfirm;
use crate::frame::{FrameHeader, FrameType, HEADER_SIZE};
use crate::position::{buf_index, expired, greater_or_equal, greater_than};
use crate::ring::ByteRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Success,
    InvalidPosition,
    ExpiredPosition,
}

pub struct StatelessReader<'a> {
    ring: &'a ByteRing,
}

impl<'a> StatelessReader<'a> {
    pub fn new(ring: &'a ByteRing) -> Self {
        Self { ring }
    }

    /// Reads every frame between `pos` and the ring's current tail,
    /// delivering MSG frames to `handler` and skipping PADDING/blank
    /// filler. `pos` is the caller's own read cursor; `bpos` is the
    /// slower-moving position this reader publishes for writer-side
    /// backpressure accounting, refreshed roughly every half-ring of
    /// progress rather than on every message.
    pub fn read_ex(
        &self,
        pos: &AtomicU64,
        bpos: &AtomicU64,
        handler: &mut dyn CopyConfirm,
    ) -> ReadOutcome {
        let mask = self.ring.config().mask();
        let ring_size = self.ring.config().ring_size;
        let bpos_max_lag = ring_size / 2;

        let mut cur = pos.load(Ordering::Relaxed);
        let initial_free_pos = self.ring.free_pos().load(Ordering::Acquire);
        if greater_than(cur, initial_free_pos) {
            return ReadOutcome::InvalidPosition;
        }

        loop {
            let free_pos = self.ring.free_pos().load(Ordering::Acquire);
            if cur == free_pos {
                break;
            }

            let idx = buf_index(cur, mask);
            let remaining_to_end = ring_size - idx as u64;

            if remaining_to_end <= HEADER_SIZE as u64 {
                // Blank filler: no header could have been written here
                // before the wrap. An exactly-header-sized gap is included
                // too: the writer treats that case as blank rather than
                // writing a zero-length padding header (which would violate
                // the header-validity invariant), so the reader must skip it
                // the same way or it will decode stale/zeroed bytes as a
                // header. Skipping happens before the expiration check below
                // can run on this iteration, so a reader parked exactly in a
                // blank region can cross an expiration boundary unnoticed
                // until the next header.
                cur += remaining_to_end;
                continue;
            }

            if expired(cur, free_pos, ring_size) {
                pos.store(cur, Ordering::Relaxed);
                return ReadOutcome::ExpiredPosition;
            }

            let header = FrameHeader::decode_from(&self.ring.payload()[idx..idx + HEADER_SIZE]);
            let free_pos_after_header = self.ring.free_pos().load(Ordering::Acquire);
            let header = match header {
                Some(h) if h.is_valid() && !expired(cur, free_pos_after_header, ring_size) => h,
                _ => {
                    pos.store(cur, Ordering::Relaxed);
                    return ReadOutcome::ExpiredPosition;
                }
            };

            if header.frame_type == FrameType::Msg {
                let data_start = idx + HEADER_SIZE;
                let data_end = data_start + header.length as usize;
                let wants_delivery = handler.copy(&self.ring.payload()[data_start..data_end]);
                if wants_delivery {
                    let free_pos_after_copy = self.ring.free_pos().load(Ordering::Acquire);
                    if expired(cur, free_pos_after_copy, ring_size) {
                        pos.store(cur, Ordering::Relaxed);
                        return ReadOutcome::ExpiredPosition;
                    }
                    handler.confirm();
                }
            }

            cur += HEADER_SIZE as u64 + header.length as u64;

            let bpos_val = bpos.load(Ordering::Relaxed);
            if greater_or_equal(cur, bpos_val.wrapping_add(bpos_max_lag)) {
                bpos.store(cur, Ordering::Relaxed);
            }
        }

        pos.store(cur, Ordering::Relaxed);
        bpos.store(cur, Ordering::Relaxed);
        ReadOutcome::Success
    }
}
