use std::io;

/// Failures from the POSIX-backed collaborators: shared memory, the robust
/// mutex, and the notification socket. Mutex/notification failures that the
/// original treats as unrecoverable are not represented here — they panic at
/// the call site instead (see `robust_mutex` and `notify`).
#[derive(Debug, thiserror::Error)]
pub enum SysError {
    #[error("invalid shared memory object name '{0}'")]
    InvalidName(String),

    #[error("shm_open failed for '{name}'")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("ftruncate failed for '{name}'")]
    Truncate {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("mmap failed for '{name}'")]
    Mmap {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("region '{name}' is smaller than required: expected at least {expected} bytes, got {actual}")]
    RegionTooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("shm_unlink failed for '{name}'")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("region '{name}' was not yet initialized by its creator after {attempts} attempts")]
    NotInitialized { name: String, attempts: u32 },

    #[error("multicast bind failed for {addr}")]
    NotifyBind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("multicast send failed")]
    NotifySend(#[source] io::Error),

    #[error("multicast recv failed")]
    NotifyRecv(#[source] io::Error),
}
