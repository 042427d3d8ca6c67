/// Failures that can occur constructing a ring or a reader. Expiration and
/// invalid-position outcomes of an actual read are not errors — they are
/// ordinary [`crate::reader::ReadOutcome`] values, since a reader falling
/// behind is expected behavior, not a fault.
#[derive(Debug, thiserror::Error)]
pub enum RmpError {
    #[error("ring '{0}' has not finished initialization yet")]
    Uninitialized(String),

    #[error("reader-info table '{0}' has no free slots")]
    ReaderSlotExhausted(String),

    #[error(transparent)]
    Sys(#[from] toroni_sys::SysError),
}
