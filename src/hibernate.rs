//! RTC wall clock and standby with RTC wakeup.
//!
//! Standby powers down every domain except the backup domain. The RTC keeps
//! counting and its wakeup timer resets the chip, so a sleep never returns.
use core::cell::RefCell;

use chrono::{Datelike, NaiveDate, Timelike};
use cortex_m::peripheral::{DWT, SCB};
use critical_section::Mutex;
use log::{info, warn};
use stm32h7xx_hal::{pac, rtc::Rtc};

use crate::{
    calendar::{self, DateTime},
    interrupt,
    recorder::{Clock, PowerControl},
    CLOCK_RATE_HZ,
};

/// The RTC is read by the file system time source as well as by the clock.
static RTC: Mutex<RefCell<Option<Rtc>>> = Mutex::new(RefCell::new(None));

/// Longest wakeup interval: 17 bit counter on the 1 Hz clock.
pub const MAX_SLEEP_SECS: u32 = 0x2_0000;

/// Current RTC time, or `None` if the calendar was never set.
pub fn now() -> Option<DateTime> {
    interrupt::free(|cs| {
        let rtc = RTC.borrow_ref(cs);
        let dt = rtc.as_ref()?.date_time()?;
        Some(DateTime {
            year: dt.year() as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        })
    })
}

/// Epoch seconds on top of the board RTC. Loop timing reads the core cycle
/// counter, which board init starts.
pub struct RtcClock {
    _private: (),
}

impl RtcClock {
    pub fn new(rtc: Rtc) -> Self {
        interrupt::free(|cs| RTC.borrow(cs).replace(Some(rtc)));
        if now().is_none() {
            warn!("RTC calendar not set, counting from the epoch");
        }
        RtcClock { _private: () }
    }
}

impl Clock for RtcClock {
    const TICKS_PER_US: u32 = CLOCK_RATE_HZ.raw() / 1_000_000;

    fn now(&self) -> u32 {
        now().map(|dt| dt.to_epoch()).unwrap_or(0)
    }

    fn ticks(&self) -> u32 {
        DWT::cycle_count()
    }

    fn set(&mut self, epoch: u32) {
        let dt = calendar::to_calendar(epoch);
        if !dt.fits_rtc() {
            warn!("RTC cannot hold {}", dt);
            return;
        }
        let Some(naive) = NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())
            .and_then(|date| date.and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into()))
        else {
            warn!("invalid date {}", dt);
            return;
        };
        interrupt::free(|cs| {
            if let Some(rtc) = RTC.borrow_ref_mut(cs).as_mut() {
                rtc.set_date_time(naive);
            }
        });
        info!("RTC set to {}", dt);
    }
}

/// Standby entry for the STM32H750.
pub struct Standby {
    scb: SCB,
}

impl Standby {
    pub fn new(scb: SCB) -> Self {
        Standby { scb }
    }

    /// Arm the RTC wakeup timer for `seconds` on the 1 Hz calendar clock.
    fn arm_wakeup(seconds: u32) {
        let ticks = seconds.clamp(1, MAX_SLEEP_SECS) - 1;
        // 0b110 adds 2^16 to the 16 bit reload value
        let (wucksel, reload) = if ticks > 0xFFFF {
            (0b110, ticks - 0x1_0000)
        } else {
            (0b100, ticks)
        };

        let rtc = unsafe { &*pac::RTC::ptr() };
        // Unlock the RTC registers
        rtc.wpr.write(|w| unsafe { w.bits(0xCA) });
        rtc.wpr.write(|w| unsafe { w.bits(0x53) });

        rtc.cr.modify(|_, w| w.wute().clear_bit());
        while rtc.isr.read().wutwf().bit_is_clear() {}
        rtc.wutr.write(|w| unsafe { w.wut().bits(reload as u16) });
        rtc.cr
            .modify(|_, w| unsafe { w.wucksel().bits(wucksel) });
        rtc.isr.modify(|_, w| w.wutf().clear_bit());
        rtc.cr.modify(|_, w| w.wute().set_bit().wutie().set_bit());

        // Lock again
        rtc.wpr.write(|w| unsafe { w.bits(0xFF) });
    }
}

impl PowerControl for Standby {
    fn sleep_for(&mut self, seconds: u32) -> ! {
        if seconds > MAX_SLEEP_SECS {
            info!("sleep of {} s split, waking after {} s", seconds, MAX_SLEEP_SECS);
        }
        info!("standby for {} s", seconds.min(MAX_SLEEP_SECS));
        Self::arm_wakeup(seconds);

        cortex_m::interrupt::disable();
        let pwr = unsafe { &*pac::PWR::ptr() };
        // All domains to standby once the CPU sleeps, clear old standby flags
        pwr.cpucr.modify(|_, w| {
            w.pdds_d1()
                .set_bit()
                .pdds_d2()
                .set_bit()
                .pdds_d3()
                .set_bit()
                .cssf()
                .set_bit()
        });
        self.scb.set_sleepdeep();
        cortex_m::asm::dsb();
        cortex_m::asm::wfi();

        // Standby was refused, a reset is the next best thing
        warn!("standby entry failed, resetting");
        system_reset()
    }

    fn halt(&mut self) -> ! {
        cortex_m::interrupt::disable();
        loop {
            cortex_m::asm::wfi();
        }
    }
}

/// Reset the device.
///
/// This should behave exactly like pressing the RESET button.
pub fn system_reset() -> ! {
    // Clear all interrupts.
    let ptr = unsafe { &*pac::RCC::PTR };
    ptr.cier.reset();

    SCB::sys_reset()
}
