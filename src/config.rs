//! Runtime settings of a recording session.
//!
//! Sizes fixed at build time (block length, queue depth, disk buffer) are
//! constants in the crate root; everything here can change between sessions
//! or from the console.
use crate::{schedule::ScheduleWindow, Error, AUDIO_SAMPLE_RATE, PREALLOCATE_BYTES, SECTOR_SIZE};

/// Codec input feeding the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputSelect {
    #[default]
    LineIn,
    Mic,
}

impl InputSelect {
    /// Header encoding.
    pub fn code(self) -> u16 {
        match self {
            InputSelect::LineIn => 0,
            InputSelect::Mic => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub sample_rate: u32,
    pub schedule: ScheduleWindow,
    /// First four bytes of every file.
    pub magic: [u8; 4],
    /// One or two ASCII alphanumerics in front of `HHMMSS.BIN`.
    pub file_prefix: &'static str,
    pub preallocate_bytes: u64,
    /// Seconds without capture data before the file is closed.
    pub watchdog_secs: u32,
    /// Standby length after a watchdog stall.
    pub recovery_sleep_secs: u32,
    pub input: InputSelect,
    pub mic_gain_db: u8,
}

impl Config {
    pub const DEFAULT: Config = Config {
        sample_rate: AUDIO_SAMPLE_RATE,
        schedule: ScheduleWindow::CONTINUOUS,
        magic: *b"ALOG",
        file_prefix: "A",
        preallocate_bytes: PREALLOCATE_BYTES,
        watchdog_secs: 10,
        recovery_sleep_secs: 10,
        input: InputSelect::LineIn,
        mic_gain_db: 0,
    };

    pub fn validate(&self) -> Result<(), Error> {
        self.schedule.validate()?;
        if self.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive"));
        }
        let prefix = self.file_prefix.as_bytes();
        if prefix.is_empty() || prefix.len() > 2 || !prefix.iter().all(u8::is_ascii_alphanumeric) {
            return Err(Error::Config("file prefix must be 1 or 2 alphanumerics"));
        }
        if self.watchdog_secs == 0 || self.recovery_sleep_secs == 0 {
            return Err(Error::Config("watchdog times must be positive"));
        }
        Ok(())
    }

    /// Whole frames of `frame_bytes` must tile a sector so the disk buffer
    /// cursor stays frame aligned.
    pub fn validate_frame(frame_bytes: usize) -> Result<(), Error> {
        if frame_bytes == 0 || SECTOR_SIZE % frame_bytes != 0 {
            return Err(Error::Config("frame size does not divide the sector"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DailyWindows, HourWindow};

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_settings() {
        let cases = [
            Config {
                file_prefix: "",
                ..Config::DEFAULT
            },
            Config {
                file_prefix: "ABC",
                ..Config::DEFAULT
            },
            Config {
                file_prefix: "A/",
                ..Config::DEFAULT
            },
            Config {
                watchdog_secs: 0,
                ..Config::DEFAULT
            },
            Config {
                schedule: ScheduleWindow {
                    daily: DailyWindows::One(HourWindow::new(3, 30)),
                    ..ScheduleWindow::CONTINUOUS
                },
                ..Config::DEFAULT
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn frame_must_tile_a_sector() {
        assert!(Config::validate_frame(2).is_ok());
        assert!(Config::validate_frame(8).is_ok());
        assert!(Config::validate_frame(6).is_err());
        assert!(Config::validate_frame(0).is_err());
    }
}
