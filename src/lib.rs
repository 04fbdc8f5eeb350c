//! Duty-cycled audio logger for Daisy boards.
//!
//! Samples arrive from the codec in interrupt context and are parked in a
//! reference counted [block pool](pool). The main loop drains the per-channel
//! [capture queues](queue) into a sector aligned [disk buffer](disk), writes
//! whole buffers to the SD card through the [file lifecycle](file), and asks
//! the [scheduler](schedule) on every pass whether to keep recording, start a
//! new file, or power down until the next acquisition window.
//!
//! Everything touching the STM32H750 lives behind the `board` feature; the
//! data path itself is plain `no_std` code and is tested on the host.
#![cfg_attr(not(test), no_std)]

pub mod calendar;
pub mod capture;
pub mod config;
pub mod console;
pub mod disk;
pub mod error;
pub mod file;
pub mod header;
pub mod interrupt;
pub mod pool;
pub mod queue;
pub mod recorder;
pub mod sample;
pub mod schedule;
pub mod storage;

#[cfg(feature = "board")]
pub mod audio;
#[cfg(feature = "board")]
pub mod board;
#[cfg(feature = "board")]
pub mod hibernate;
#[cfg(feature = "board")]
pub mod logger;
#[cfg(feature = "board")]
pub mod sdcard;
#[cfg(feature = "board")]
pub mod uart;

pub use error::{Error, StorageError};

#[cfg(feature = "board")]
pub use cortex_m_rtic as rtic;
#[cfg(feature = "board")]
pub use stm32h7xx_hal as hal;

/// Codec sample rate.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
/// Samples per channel delivered by one capture interrupt.
pub const BLOCK_SAMPLES: usize = 128;
/// Channels written to each file.
pub const CHANNELS: usize = 1;
/// Pending blocks each channel queue can hold before dropping.
pub const QUEUE_DEPTH: usize = 200;
/// Pool slots: every queue full plus a few in flight inside the interrupt.
pub const POOL_BLOCKS: usize = QUEUE_DEPTH * CHANNELS + 6;
/// Physical write granularity of the SD card.
pub const SECTOR_SIZE: usize = 512;
/// Bytes gathered before one blocking write to the card.
pub const DISK_BUFFER_BYTES: usize = 32 * SECTOR_SIZE;
/// Space reserved on the card when a file is opened.
pub const PREALLOCATE_BYTES: u64 = 8 << 20;

#[cfg(feature = "board")]
pub const AUDIO_SAMPLE_HZ: hal::time::Hertz = hal::time::Hertz::from_raw(AUDIO_SAMPLE_RATE);
#[cfg(feature = "board")]
pub const CLOCK_RATE_HZ: hal::time::Hertz = hal::time::Hertz::from_raw(400_000_000_u32);
