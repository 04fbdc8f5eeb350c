//! Civil date and time from RTC epoch seconds.
//!
//! Epoch origin is 1970-01-01 00:00:00. Timestamps are `u32`, so the range
//! ends at 2106-02-07 06:28:15.
use core::{fmt, ops::RangeInclusive};

pub const EPOCH_YEAR: u16 = 1970;
pub const SECS_PER_DAY: u32 = 86_400;

/// Years the STM32H7 calendar holds. It stores two BCD digits above 2000
/// and the HAL rejects 2000 and 2100.
pub const RTC_YEARS: RangeInclusive<u16> = 2001..=2099;

const MONTH_DAYS: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub year: u16,
    /// 1..=12
    pub month: u8,
    /// 1..=31
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

pub fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_in_year(year: u16) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Days in `month` (1..=12) of `year`; 0 for an invalid month.
pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        1..=12 => MONTH_DAYS[month as usize - 1],
        _ => 0,
    }
}

pub fn to_calendar(epoch: u32) -> DateTime {
    let second = (epoch % 60) as u8;
    let minute = (epoch / 60 % 60) as u8;
    let hour = (epoch / 3600 % 24) as u8;
    let mut days = epoch / SECS_PER_DAY;

    let mut year = EPOCH_YEAR;
    while days >= days_in_year(year) {
        days -= days_in_year(year);
        year += 1;
    }
    let mut month = 1;
    loop {
        let length = days_in_month(year, month) as u32;
        if days < length {
            break;
        }
        days -= length;
        month += 1;
    }
    DateTime {
        year,
        month,
        day: days as u8 + 1,
        hour,
        minute,
        second,
    }
}

/// Epoch seconds of `dt`. Values past the `u32` range wrap.
pub fn from_calendar(dt: &DateTime) -> u32 {
    let mut days: u32 = 0;
    for year in EPOCH_YEAR..dt.year {
        days = days.wrapping_add(days_in_year(year));
    }
    for month in 1..dt.month.min(13) {
        days = days.wrapping_add(days_in_month(dt.year, month) as u32);
    }
    days = days.wrapping_add((dt.day as u32).saturating_sub(1));
    days.wrapping_mul(SECS_PER_DAY)
        .wrapping_add(dt.hour as u32 * 3600)
        .wrapping_add(dt.minute as u32 * 60)
        .wrapping_add(dt.second as u32)
}

/// Day of week, 0 = Sunday. 1970-01-01 was a Thursday.
pub fn weekday(epoch: u32) -> u8 {
    ((epoch / SECS_PER_DAY + 4) % 7) as u8
}

impl DateTime {
    pub fn from_epoch(epoch: u32) -> Self {
        to_calendar(epoch)
    }

    pub fn to_epoch(&self) -> u32 {
        from_calendar(self)
    }

    /// Fields are in range and the instant fits the `u32` epoch.
    pub fn is_valid(&self) -> bool {
        (EPOCH_YEAR..=2106).contains(&self.year)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
            && to_calendar(from_calendar(self)) == *self
    }

    /// The hardware calendar can store this date.
    pub fn fits_rtc(&self) -> bool {
        RTC_YEARS.contains(&self.year)
    }

    /// Seconds since midnight.
    pub fn seconds_of_day(&self) -> u32 {
        self.hour as u32 * 3600 + self.minute as u32 * 60 + self.second as u32
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
