//! Error types.
//!
//! Storage errors are fatal: there is no second card to fall back on, so the
//! control loop stops at the first failing call and the device halts.
//! Overflow of the capture path is not an error at all, it only bumps drop
//! counters.
use core::fmt;

use thiserror::Error;

/// Failure reported by a [`Storage`](crate::storage::Storage) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("card not initialized")]
    NotReady,
    #[error("no file open")]
    NotOpen,
    #[error("name not representable on the volume")]
    InvalidName,
    #[error("volume full")]
    Full,
    #[error("short write: {written} of {requested} bytes")]
    ShortWrite { requested: usize, written: usize },
    #[error("device i/o error")]
    Io,
}

/// The storage call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Init,
    ChangeDir,
    Open,
    Preallocate,
    Write,
    Close,
    Exit,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageOp::Init => "init",
            StorageOp::ChangeDir => "chdir",
            StorageOp::Open => "open",
            StorageOp::Preallocate => "preallocate",
            StorageOp::Write => "write",
            StorageOp::Close => "close",
            StorageOp::Exit => "exit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("storage {op} failed: {source}")]
    Storage {
        op: StorageOp,
        #[source]
        source: StorageError,
    },
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    #[error("file lifecycle violated: {0}")]
    State(&'static str),
}

impl Error {
    /// Adapter for `map_err` at storage call sites.
    pub fn storage(op: StorageOp) -> impl FnOnce(StorageError) -> Error {
        move |source| Error::Storage { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_names_the_failing_call() {
        let err = Error::storage(StorageOp::Preallocate)(StorageError::Full);
        assert_eq!(
            err.to_string(),
            "storage preallocate failed: volume full"
        );
    }
}
