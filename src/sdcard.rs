//! SD card storage: SDMMC1 block device under an `embedded-sdmmc` FAT volume.
use core::cell::{Cell, RefCell};

use embedded_sdmmc::{
    Block, BlockCount, BlockDevice, BlockIdx, Mode, RawDirectory, RawFile, RawVolume,
    TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use log::{debug, info, warn};
use stm32h7xx_hal::{sdmmc, time::Hertz};

use crate::{board::Sdmmc1 as Card, hibernate, storage::Storage, StorageError};

/// Bus clock once the card is identified.
const SD_CLOCK_HZ: Hertz = Hertz::from_raw(50_000_000);

/// Blocking single block transfers on SDMMC1. The card is identified on
/// first access, so a boot that goes straight back to sleep never powers it.
pub struct SdBlocks {
    sdmmc: RefCell<Card>,
    ready: Cell<bool>,
}

impl SdBlocks {
    pub fn new(sdmmc: Card) -> Self {
        SdBlocks {
            sdmmc: RefCell::new(sdmmc),
            ready: Cell::new(false),
        }
    }

    fn card(&self) -> Result<core::cell::RefMut<'_, Card>, sdmmc::Error> {
        let mut sdmmc = self.sdmmc.borrow_mut();
        if !self.ready.get() {
            if let Err(err) = sdmmc.init(SD_CLOCK_HZ) {
                warn!("SD card init failed: {:?}", err);
                return Err(err);
            }
            info!("SD card {} bytes", sdmmc.card()?.size());
            self.ready.set(true);
        }
        Ok(sdmmc)
    }
}

impl BlockDevice for SdBlocks {
    type Error = sdmmc::Error;

    fn read(
        &self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        let mut sdmmc = self.card()?;
        for (address, block) in (start_block_idx.0..).zip(blocks.iter_mut()) {
            sdmmc.read_block(address, &mut block.contents)?;
        }
        Ok(())
    }

    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut sdmmc = self.card()?;
        for (address, block) in (start_block_idx.0..).zip(blocks.iter()) {
            sdmmc.write_block(address, &block.contents)?;
        }
        Ok(())
    }

    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        let size = self.card()?.card()?.size();
        Ok(BlockCount((size / Block::LEN as u64) as u32))
    }
}

/// FAT timestamps from the board RTC.
pub struct RtcTime;

impl TimeSource for RtcTime {
    fn get_timestamp(&self) -> Timestamp {
        let dt = hibernate::now().unwrap_or_else(|| crate::calendar::to_calendar(0));
        Timestamp {
            year_since_1970: (dt.year - crate::calendar::EPOCH_YEAR) as u8,
            zero_indexed_month: dt.month - 1,
            zero_indexed_day: dt.day - 1,
            hours: dt.hour,
            minutes: dt.minute,
            seconds: dt.second,
        }
    }
}

fn map_error(err: embedded_sdmmc::Error<sdmmc::Error>) -> StorageError {
    use embedded_sdmmc::Error;
    debug!("sdmmc: {:?}", err);
    match err {
        Error::DiskFull | Error::NotEnoughSpace => StorageError::Full,
        Error::FilenameError(_) => StorageError::InvalidName,
        _ => StorageError::Io,
    }
}

/// One volume, one working directory and at most one open file.
pub struct SdStorage {
    volume_mgr: VolumeManager<SdBlocks, RtcTime>,
    volume: Option<RawVolume>,
    root: Option<RawDirectory>,
    dir: Option<RawDirectory>,
    file: Option<RawFile>,
}

impl SdStorage {
    pub fn new(sdmmc: Card) -> Self {
        SdStorage {
            volume_mgr: VolumeManager::new(SdBlocks::new(sdmmc), RtcTime),
            volume: None,
            root: None,
            dir: None,
            file: None,
        }
    }

    /// Create `name` under `parent` unless present, then enter it.
    fn enter(&mut self, parent: RawDirectory, name: &str) -> Result<RawDirectory, StorageError> {
        match self.volume_mgr.make_dir_in_dir(parent, name) {
            Ok(()) => debug!("created {}", name),
            Err(embedded_sdmmc::Error::DirAlreadyExists) => {}
            Err(err) => return Err(map_error(err)),
        }
        self.volume_mgr.open_dir(parent, name).map_err(map_error)
    }

    fn leave_dir(&mut self) -> Result<(), StorageError> {
        if let Some(dir) = self.dir.take() {
            self.volume_mgr.close_dir(dir).map_err(map_error)?;
        }
        Ok(())
    }
}

impl Storage for SdStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        if self.volume.is_some() {
            return Ok(());
        }
        // the first volume read brings up the card
        let volume = self
            .volume_mgr
            .open_raw_volume(VolumeIdx(0))
            .map_err(map_error)?;
        self.volume = Some(volume);
        self.root = Some(self.volume_mgr.open_root_dir(volume).map_err(map_error)?);
        info!("FAT volume mounted");
        Ok(())
    }

    fn change_dir(&mut self, path: &str) -> Result<(), StorageError> {
        let root = self.root.ok_or(StorageError::NotReady)?;
        self.leave_dir()?;
        let mut current: Option<RawDirectory> = None;
        for name in path.split('/').filter(|name| !name.is_empty()) {
            let next = self.enter(current.unwrap_or(root), name)?;
            if let Some(parent) = current.replace(next) {
                self.volume_mgr.close_dir(parent).map_err(map_error)?;
            }
        }
        self.dir = current;
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<(), StorageError> {
        if self.file.is_some() {
            self.truncate_and_close()?;
        }
        let dir = self
            .dir
            .or(self.root)
            .ok_or(StorageError::NotReady)?;
        let file = self
            .volume_mgr
            .open_file_in_dir(dir, name, Mode::ReadWriteCreateOrTruncate)
            .map_err(map_error)?;
        self.file = Some(file);
        Ok(())
    }

    /// `embedded-sdmmc` allocates clusters only when a write needs them, so
    /// nothing is reserved here.
    fn preallocate(&mut self, bytes: u64) -> Result<(), StorageError> {
        if self.file.is_none() {
            return Err(StorageError::NotOpen);
        }
        debug!("{} bytes not reserved, clusters are chained on write", bytes);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        let file = self.file.ok_or(StorageError::NotOpen)?;
        self.volume_mgr.write(file, buf).map_err(map_error)?;
        Ok(buf.len())
    }

    fn truncate_and_close(&mut self) -> Result<(), StorageError> {
        // The directory entry length is the written length, nothing to cut
        let file = self.file.take().ok_or(StorageError::NotOpen)?;
        self.volume_mgr.close_file(file).map_err(map_error)
    }

    fn exit(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            self.volume_mgr.close_file(file).map_err(map_error)?;
        }
        self.leave_dir()?;
        if let Some(root) = self.root.take() {
            self.volume_mgr.close_dir(root).map_err(map_error)?;
        }
        if let Some(volume) = self.volume.take() {
            self.volume_mgr.close_volume(volume).map_err(map_error)?;
        }
        info!("FAT volume released");
        Ok(())
    }
}
