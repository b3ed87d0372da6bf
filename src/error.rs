//! The error type returned by every fallible public operation.
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("arena exhausted its current reservation")]
    OutOfReservation,

    #[error("out of memory (errno {0})")]
    OutOfMemory(i32),

    #[error("address is not owned by this heap")]
    AddrNotOwned,

    #[error("internal invariant violation: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Wraps a raw mapper/mmap errno into the crate's error type.
    pub(crate) fn from_errno(errno: i32) -> Self {
        Error::OutOfMemory(errno)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
