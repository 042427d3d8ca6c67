//! `toroni-sys`: the POSIX collaborators the Toroni transport is built on.
//!
//! Everything above this crate — the byte ring, the reader-info table, the
//! topic layer — is written against these four contracts:
//!
//! - [`shm`]: named shared-memory regions, create-or-open / read-only attach.
//! - [`robust_mutex`]: a process-shared mutex that survives its owner's death.
//! - [`notify`]: a broadcast wake-up signal reachable from any process.
//! - [`queue`]: the MPSC staging queue and serial work queue the topic layer
//!   uses to offload writes and dispatch off of caller threads.
//!
//! None of these are lock-free; they exist to make the crate runnable end to
//! end, not to be the fast path. The fast path is the ring itself, in
//! `toroni-rmp`.

pub mod error;
pub mod notify;
pub mod queue;
pub mod robust_mutex;
pub mod shm;

pub use error::SysError;
pub use notify::Notifier;
pub use queue::{MpscStagingQueue, SerialWorkQueue};
pub use robust_mutex::{RobustMutexGuard, RobustProcMutex};
pub use shm::{SharedRegion, SharedRegionRo};
