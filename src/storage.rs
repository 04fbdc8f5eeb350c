//! The card and its filesystem as seen by the file lifecycle.
use crate::StorageError;

/// Blocking block storage with a hierarchical filesystem on top.
///
/// Exactly one file is open at a time. Every call blocks until the card has
/// finished.
pub trait Storage {
    /// Bring up the card and mount the volume.
    fn init(&mut self) -> Result<(), StorageError>;

    /// Make `path` (absolute, `/` separated) the working directory,
    /// creating missing components.
    fn change_dir(&mut self, path: &str) -> Result<(), StorageError>;

    /// Create `name` in the working directory, replacing an existing file.
    fn open(&mut self, name: &str) -> Result<(), StorageError>;

    /// Reserve `bytes` for the open file so that data writes do not have to
    /// grow file system metadata.
    ///
    /// Only a request: the SD card implementation cannot reserve FAT
    /// clusters and returns `Ok` without reserving anything, so on the device
    /// cluster chains still grow during data writes. The file length at close
    /// is always the written length, never `bytes`.
    fn preallocate(&mut self, bytes: u64) -> Result<(), StorageError>;

    /// Append `buf` to the open file, returning the bytes accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError>;

    /// Cut the open file to the bytes actually written and close it.
    fn truncate_and_close(&mut self) -> Result<(), StorageError>;

    /// Release the volume before power goes away.
    fn exit(&mut self) -> Result<(), StorageError>;
}

impl<T: Storage + ?Sized> Storage for &mut T {
    fn init(&mut self) -> Result<(), StorageError> {
        (**self).init()
    }

    fn change_dir(&mut self, path: &str) -> Result<(), StorageError> {
        (**self).change_dir(path)
    }

    fn open(&mut self, name: &str) -> Result<(), StorageError> {
        (**self).open(name)
    }

    fn preallocate(&mut self, bytes: u64) -> Result<(), StorageError> {
        (**self).preallocate(bytes)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        (**self).write(buf)
    }

    fn truncate_and_close(&mut self) -> Result<(), StorageError> {
        (**self).truncate_and_close()
    }

    fn exit(&mut self) -> Result<(), StorageError> {
        (**self).exit()
    }
}
