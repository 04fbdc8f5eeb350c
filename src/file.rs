//! One file at a time on the card: naming, directories, open and close.
use core::fmt::{self, Write};

use log::{debug, info};

use crate::{
    calendar,
    error::StorageOp,
    storage::Storage,
    Error, StorageError,
};

const NAME_CAPACITY: usize = 32;

/// Fixed capacity text for paths and file names.
#[derive(Clone, Copy)]
pub struct Name {
    buf: [u8; NAME_CAPACITY],
    len: usize,
}

impl Name {
    pub const CAPACITY: usize = NAME_CAPACITY;

    pub const fn new() -> Self {
        Name {
            buf: [0; NAME_CAPACITY],
            len: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // only `write_str` fills the buffer, whole `str`s at a time
        core::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Name {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > Name::CAPACITY {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Closed,
    /// Created and preallocated, nothing flushed yet.
    Open,
    Writing,
    Closing,
}

/// Hour directory a file lands in, `(yyyymmdd, hour)`.
type DirKey = (u32, u8);

pub struct FileLifecycle<St> {
    storage: St,
    state: FileState,
    dir: Option<DirKey>,
    name: Name,
    prefix: &'static str,
    preallocate: u64,
    bytes_written: u64,
    files: u32,
}

impl<St: Storage> FileLifecycle<St> {
    pub fn new(storage: St, prefix: &'static str, preallocate: u64) -> Self {
        FileLifecycle {
            storage,
            state: FileState::Closed,
            dir: None,
            name: Name::new(),
            prefix,
            preallocate,
            bytes_written: 0,
            files: 0,
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == FileState::Closed
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut St {
        &mut self.storage
    }

    /// Name of the open file, or of the last one closed.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Payload and header bytes accepted by the card for the current file.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Files opened since boot.
    pub fn files(&self) -> u32 {
        self.files
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.dir = None;
        self.storage.init().map_err(Error::storage(StorageOp::Init))
    }

    /// Closed -> Open. Enters the hour directory of `now` first if the
    /// previous file was in another one.
    pub fn open(&mut self, now: u32) -> Result<(), Error> {
        if self.state != FileState::Closed {
            return Err(Error::State("open while a file is open"));
        }
        let dt = calendar::to_calendar(now);
        let key = (
            dt.year as u32 * 10_000 + dt.month as u32 * 100 + dt.day as u32,
            dt.hour,
        );
        if self.dir != Some(key) {
            let mut path = Name::new();
            write!(path, "/{:08}/{:02}", key.0, key.1)
                .map_err(|_| Error::storage(StorageOp::ChangeDir)(StorageError::InvalidName))?;
            self.storage
                .change_dir(path.as_str())
                .map_err(Error::storage(StorageOp::ChangeDir))?;
            debug!("entered {}", path);
            self.dir = Some(key);
        }

        self.name.clear();
        write!(
            self.name,
            "{}{:02}{:02}{:02}.BIN",
            self.prefix, dt.hour, dt.minute, dt.second
        )
        .map_err(|_| Error::storage(StorageOp::Open)(StorageError::InvalidName))?;
        self.storage
            .open(self.name.as_str())
            .map_err(Error::storage(StorageOp::Open))?;
        self.storage
            .preallocate(self.preallocate)
            .map_err(Error::storage(StorageOp::Preallocate))?;

        self.state = FileState::Open;
        self.bytes_written = 0;
        self.files = self.files.wrapping_add(1);
        info!("opened {:08}/{:02}/{}", key.0, key.1, self.name);
        Ok(())
    }

    /// Blocking write of one buffer. Anything short of the full length is
    /// a storage failure.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self.state {
            FileState::Open | FileState::Writing => {}
            _ => return Err(Error::State("write without an open file")),
        }
        let written = self
            .storage
            .write(buf)
            .map_err(Error::storage(StorageOp::Write))?;
        self.bytes_written += written as u64;
        if written < buf.len() {
            return Err(Error::storage(StorageOp::Write)(StorageError::ShortWrite {
                requested: buf.len(),
                written,
            }));
        }
        self.state = FileState::Writing;
        Ok(())
    }

    /// Open/Writing -> Closing -> Closed. Closing a closed file does nothing.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == FileState::Closed {
            return Ok(());
        }
        self.state = FileState::Closing;
        self.storage
            .truncate_and_close()
            .map_err(Error::storage(StorageOp::Close))?;
        self.state = FileState::Closed;
        info!("closed {} after {} bytes", self.name, self.bytes_written);
        Ok(())
    }

    /// Close and release the volume ahead of power down.
    pub fn exit(&mut self) -> Result<(), Error> {
        self.close()?;
        self.dir = None;
        self.storage.exit().map_err(Error::storage(StorageOp::Exit))
    }
}
