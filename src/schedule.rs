//! When to record, when to start a new file, and how long to sleep.
//!
//! Decisions are a pure function of the RTC epoch seconds plus the previous
//! file age, so the device reaches the same conclusion after every wake from
//! standby without keeping state across resets.
use crate::{calendar::SECS_PER_DAY, header::NO_HOUR, Error};

/// Daily recording window `[start, end)` in whole hours.
///
/// `start > end` spans midnight; `start == end` is the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start: u8,
    pub end: u8,
}

impl HourWindow {
    pub const fn new(start: u8, end: u8) -> Self {
        HourWindow { start, end }
    }

    fn is_valid(&self) -> bool {
        self.start < 24 && self.end < 24
    }

    /// `time_of_day` is seconds since midnight.
    pub fn contains(&self, time_of_day: u32) -> bool {
        let start = self.start as u32 * 3600;
        let end = self.end as u32 * 3600;
        match start.cmp(&end) {
            core::cmp::Ordering::Equal => true,
            core::cmp::Ordering::Less => (start..end).contains(&time_of_day),
            core::cmp::Ordering::Greater => time_of_day >= start || time_of_day < end,
        }
    }

    /// Seconds from `time_of_day` to the next opening of this window.
    fn until_start(&self, time_of_day: u32) -> u32 {
        let start = self.start as u32 * 3600;
        (start + SECS_PER_DAY - time_of_day % SECS_PER_DAY) % SECS_PER_DAY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DailyWindows {
    #[default]
    Always,
    One(HourWindow),
    Two(HourWindow, HourWindow),
}

impl DailyWindows {
    fn iter(&self) -> impl Iterator<Item = &HourWindow> {
        let (first, second) = match self {
            DailyWindows::Always => (None, None),
            DailyWindows::One(w) => (Some(w), None),
            DailyWindows::Two(a, b) => (Some(a), Some(b)),
        };
        first.into_iter().chain(second)
    }

    pub fn is_valid(&self) -> bool {
        self.iter().all(HourWindow::is_valid)
    }

    /// Start/end hours as stored in the file header.
    pub fn header_hours(&self) -> [u16; 4] {
        let mut hours = [NO_HOUR; 4];
        for (i, w) in self.iter().enumerate() {
            hours[2 * i] = w.start as u16;
            hours[2 * i + 1] = w.end as u16;
        }
        hours
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    /// Recording part of each duty cycle.
    pub on_secs: u32,
    /// Sleeping part of each duty cycle; 0 records continuously.
    pub off_secs: u32,
    /// File length; 0 keeps one file per recording period.
    pub rotation_secs: u32,
    pub daily: DailyWindows,
}

impl ScheduleWindow {
    pub const CONTINUOUS: ScheduleWindow = ScheduleWindow {
        on_secs: 60,
        off_secs: 0,
        rotation_secs: 60,
        daily: DailyWindows::Always,
    };

    pub fn validate(&self) -> Result<(), Error> {
        if self.on_secs == 0 {
            return Err(Error::Config("on time must be positive"));
        }
        if self.on_secs.checked_add(self.off_secs).is_none() {
            return Err(Error::Config("duty cycle longer than the clock range"));
        }
        if !self.daily.is_valid() {
            return Err(Error::Config("window hour out of range"));
        }
        Ok(())
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self::CONTINUOUS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    RotateNow,
    SleepFor(u32),
}

#[derive(Debug)]
pub struct Scheduler {
    window: ScheduleWindow,
    last_file_age: Option<u32>,
}

impl Scheduler {
    pub const fn new(window: ScheduleWindow) -> Self {
        Scheduler {
            window,
            last_file_age: None,
        }
    }

    pub fn window(&self) -> &ScheduleWindow {
        &self.window
    }

    /// Replace the schedule. The rotation phase restarts.
    pub fn set_window(&mut self, window: ScheduleWindow) {
        self.window = window;
        self.last_file_age = None;
    }

    /// Called once per loop pass. Sleep wins over rotation.
    pub fn tick(&mut self, now: u32) -> Decision {
        let rotate = match self.window.rotation_secs {
            0 => false,
            period => {
                let age = now % period;
                let wrapped = matches!(self.last_file_age, Some(prev) if age < prev);
                self.last_file_age = Some(age);
                wrapped
            }
        };
        match self.sleep_needed(now) {
            Some(seconds) => Decision::SleepFor(seconds),
            None if rotate => Decision::RotateNow,
            None => Decision::Continue,
        }
    }

    /// Seconds to sleep if `now` lies outside every recording period.
    pub fn sleep_needed(&self, now: u32) -> Option<u32> {
        let window = &self.window;
        if !matches!(window.daily, DailyWindows::Always) {
            let time_of_day = now % SECS_PER_DAY;
            if !window.daily.iter().any(|w| w.contains(time_of_day)) {
                return window.daily.iter().map(|w| w.until_start(time_of_day)).min();
            }
        }
        if window.off_secs > 0 {
            let period = window.on_secs.saturating_add(window.off_secs);
            let position = now % period;
            if position >= window.on_secs {
                return Some(period - position);
            }
        }
        None
    }
}
