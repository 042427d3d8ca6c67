//! The callback contract a reader uses to hand message bytes to a caller
//! without letting the caller hold a reference into the ring past the point
//! where the writer might have overwritten it.

/// `copy` sees the bytes while they are still guaranteed live; `confirm` is
/// only called if a re-check after `copy` proves the reader was not
/// overrun while `copy` ran. A handler that doesn't want the message at all
/// (e.g. after inspecting a topic header) returns `false` from `copy` and
/// never sees `confirm`.
pub trait CopyConfirm {
    fn copy(&mut self, data: &[u8]) -> bool;
    fn confirm(&mut self);
}

/// Adapts a single `FnMut(&[u8])` into a `CopyConfirm` that always confirms
/// — the common case of "just give me the bytes".
pub struct CopyAll<F: FnMut(&[u8])> {
    f: F,
}

impl<F: FnMut(&[u8])> CopyAll<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: FnMut(&[u8])> CopyConfirm for CopyAll<F> {
    fn copy(&mut self, data: &[u8]) -> bool {
        (self.f)(data);
        true
    }

    fn confirm(&mut self) {}
}
