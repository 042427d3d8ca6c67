//! Stream-position arithmetic.
//!
//! A position is a 64-bit count of bytes ever written to a ring; it only
//! grows. Comparisons use the signed-difference trick so that a position
//! that has wrapped past `u64::MAX` still orders correctly against one that
//! hasn't (in practice, at one byte per nanosecond, wrapping u64 takes over
//! 500 years, but the arithmetic costs nothing extra so there is no reason
//! to special-case it away).
//!
//! # Examples
//!
//! ```
//! use toroni_rmp::position::{greater_than, greater_or_equal};
//! assert!(greater_than(10, 5));
//! assert!(!greater_than(5, 10));
//! assert!(greater_or_equal(5, 5));
//! ```

/// `true` iff `a` is strictly ahead of `b` in stream order.
#[inline(always)]
pub fn greater_than(a: u64, b: u64) -> bool {
    (b.wrapping_sub(a) as i64) < 0
}

/// `true` iff `a` is at or ahead of `b` in stream order.
#[inline(always)]
pub fn greater_or_equal(a: u64, b: u64) -> bool {
    (b.wrapping_sub(a) as i64) <= 0
}

/// Maps a stream position to a byte offset within a power-of-two ring.
#[inline(always)]
pub fn buf_index(pos: u64, mask: u64) -> usize {
    (pos & mask) as usize
}

/// `true` iff a reader parked at `pos` has been overrun by a writer whose
/// tail now stands at `free_pos` in a ring of `ring_size` bytes: the writer
/// has advanced by one full ring or more since the reader's position.
#[inline(always)]
pub fn expired(pos: u64, free_pos: u64, ring_size: u64) -> bool {
    greater_or_equal(free_pos, pos.wrapping_add(ring_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_basic() {
        assert!(greater_than(1, 0));
        assert!(!greater_than(0, 1));
        assert!(!greater_than(5, 5));
        assert!(greater_or_equal(5, 5));
        assert!(greater_or_equal(6, 5));
        assert!(!greater_or_equal(4, 5));
    }

    #[test]
    fn ordering_survives_wraparound() {
        let a = u64::MAX;
        let b = 0u64; // one past a, i.e. b is "ahead" of a
        assert!(greater_than(b, a));
        assert!(!greater_than(a, b));
    }

    #[test]
    fn buf_index_wraps_with_mask() {
        let mask = 1023u64; // 1024-byte ring
        assert_eq!(buf_index(0, mask), 0);
        assert_eq!(buf_index(1023, mask), 1023);
        assert_eq!(buf_index(1024, mask), 0);
        assert_eq!(buf_index(1025, mask), 1);
    }

    #[test]
    fn expiration_boundary() {
        let ring_size = 1024u64;
        // reader at 0, writer has written exactly one ring: not yet expired
        assert!(!expired(0, 1023, ring_size));
        // writer advances one more byte: now expired
        assert!(expired(0, 1024, ring_size));
    }
}
