//! Errors surfaced by the topic layer. Most failures are really RMP or
//! system-level failures passed through unchanged.

#[derive(Debug, thiserror::Error)]
pub enum TpError {
    #[error("message for channel '{channel}' is {size} bytes, exceeding the bus's max message size of {max}")]
    MessageTooLarge { channel: String, size: usize, max: usize },

    #[error("channel name '{0}' contains a NUL byte")]
    InvalidChannelName(String),

    #[error(transparent)]
    Rmp(#[from] toroni_rmp::RmpError),

    #[error(transparent)]
    Sys(#[from] toroni_sys::SysError),
}
