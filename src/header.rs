//! The 512 byte record at the start of every recording.
//!
//! All integers are little-endian. Bytes past [`RESERVED`] are zero.
use core::fmt::Write;

use crate::{
    calendar::{self, DateTime},
    file::Name,
    Error,
};

pub const HEADER_LEN: usize = 512;

pub const MAGIC: usize = 0;
pub const TIMESTAMP: usize = 4;
pub const TIMESTAMP_LEN: usize = 19;
pub const SAMPLE_RATE: usize = 24;
pub const ON_SECS: usize = 28;
pub const OFF_SECS: usize = 32;
pub const ROTATION_SECS: usize = 36;
pub const WINDOWS: usize = 40;
pub const CHANNELS: usize = 48;
pub const BYTES_PER_SAMPLE: usize = 50;
pub const INPUT: usize = 52;
pub const MIC_GAIN: usize = 54;
pub const RESERVED: usize = 56;

/// Marks an unused daily window hour.
pub const NO_HOUR: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    /// Creation time, epoch seconds.
    pub created: u32,
    pub sample_rate: u32,
    pub on_secs: u32,
    pub off_secs: u32,
    pub rotation_secs: u32,
    /// start, end, start, end
    pub windows: [u16; 4],
    pub channels: u16,
    pub bytes_per_sample: u16,
    pub input: u16,
    pub mic_gain_db: u16,
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn parse_digits(text: &[u8]) -> Option<u32> {
    text.iter().try_fold(0u32, |acc, &c| {
        c.is_ascii_digit()
            .then(|| acc * 10 + (c - b'0') as u32)
    })
}

impl FileHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[MAGIC..MAGIC + 4].copy_from_slice(&self.magic);

        let dt = calendar::to_calendar(self.created);
        let mut stamp = Name::new();
        // 19 characters always fit
        let _ = write!(
            stamp,
            "{:04}_{:02}_{:02}_{:02}_{:02}_{:02}",
            dt.year, dt.month, dt.day, dt.hour, dt.minute, dt.second
        );
        buf[TIMESTAMP..TIMESTAMP + TIMESTAMP_LEN].copy_from_slice(stamp.as_bytes());

        put_u32(&mut buf, SAMPLE_RATE, self.sample_rate);
        put_u32(&mut buf, ON_SECS, self.on_secs);
        put_u32(&mut buf, OFF_SECS, self.off_secs);
        put_u32(&mut buf, ROTATION_SECS, self.rotation_secs);
        for (i, hour) in self.windows.iter().enumerate() {
            put_u16(&mut buf, WINDOWS + 2 * i, *hour);
        }
        put_u16(&mut buf, CHANNELS, self.channels);
        put_u16(&mut buf, BYTES_PER_SAMPLE, self.bytes_per_sample);
        put_u16(&mut buf, INPUT, self.input);
        put_u16(&mut buf, MIC_GAIN, self.mic_gain_db);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Config("header shorter than 512 bytes"));
        }
        let stamp = &buf[TIMESTAMP..TIMESTAMP + TIMESTAMP_LEN];
        if buf[TIMESTAMP + TIMESTAMP_LEN] != 0 || [4, 7, 10, 13, 16].iter().any(|&i| stamp[i] != b'_') {
            return Err(Error::Config("malformed header timestamp"));
        }
        let field = |at: usize, len: usize| parse_digits(&stamp[at..at + len]);
        let (Some(year), Some(month), Some(day), Some(hour), Some(minute), Some(second)) = (
            field(0, 4),
            field(5, 2),
            field(8, 2),
            field(11, 2),
            field(14, 2),
            field(17, 2),
        ) else {
            return Err(Error::Config("malformed header timestamp"));
        };
        let dt = DateTime {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
        };
        if !dt.is_valid() {
            return Err(Error::Config("header timestamp out of range"));
        }

        let mut magic = [0; 4];
        magic.copy_from_slice(&buf[MAGIC..MAGIC + 4]);
        Ok(FileHeader {
            magic,
            created: dt.to_epoch(),
            sample_rate: get_u32(buf, SAMPLE_RATE),
            on_secs: get_u32(buf, ON_SECS),
            off_secs: get_u32(buf, OFF_SECS),
            rotation_secs: get_u32(buf, ROTATION_SECS),
            windows: core::array::from_fn(|i| get_u16(buf, WINDOWS + 2 * i)),
            channels: get_u16(buf, CHANNELS),
            bytes_per_sample: get_u16(buf, BYTES_PER_SAMPLE),
            input: get_u16(buf, INPUT),
            mic_gain_db: get_u16(buf, MIC_GAIN),
        })
    }
}
