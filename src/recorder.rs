//! The main loop: capture queues to disk buffer to file, under the schedule.
use log::{debug, error, info, warn};

use crate::{
    calendar::{self, DateTime},
    capture::Capture,
    config::Config,
    console::{Command, Console, Field, Reply, Setting, Terminal},
    disk::DiskAggregator,
    file::FileLifecycle,
    header::FileHeader,
    sample::Sample,
    schedule::{Decision, ScheduleWindow, Scheduler},
    storage::Storage,
    Error,
};

/// Wall clock in RTC epoch seconds, plus a fast counter for loop timing.
pub trait Clock {
    /// Counter increments per microsecond.
    const TICKS_PER_US: u32 = 1;

    fn now(&self) -> u32;
    fn set(&mut self, epoch: u32);
    /// Free running counter, wrapping at `u32::MAX`.
    fn ticks(&self) -> u32;
}

/// Low power control. Neither call returns: waking from standby restarts
/// the firmware from reset.
pub trait PowerControl {
    fn sleep_for(&mut self, seconds: u32) -> !;
    fn halt(&mut self) -> !;
}

/// Outcome of one loop pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing was waiting.
    Idle,
    /// One block per channel went to the disk buffer.
    Recorded,
    /// The file was closed at a rotation boundary.
    Rotated,
    /// Acquisition is stopped by the operator.
    Stopped,
    /// The file is closed and the card released; power down now.
    Sleep { seconds: u32 },
}

/// Counters of one reporting second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub loops: u32,
    pub blocks: u32,
    pub dropped: u32,
    pub pool_high_water: usize,
    pub flushes: u32,
    /// Longest single pass, flush included.
    pub max_loop_us: u32,
}

/// Running totals at the last report.
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    dropped: u32,
    flushes: u32,
}

/// Interleaved bytes are staged here before entering the disk buffer.
const SCRATCH_BYTES: usize = 256;

pub struct Recorder<'c, 'a, S, St, C, const N: usize, const CH: usize, const Q: usize, const D: usize>
{
    capture: &'c Capture<'a, S, N, CH, Q>,
    file: FileLifecycle<St>,
    disk: DiskAggregator<D>,
    scheduler: Scheduler,
    clock: C,
    config: Config,
    stopped: bool,
    last_data: u32,
    second: u32,
    current: Stats,
    totals: Totals,
    last_report: Option<Stats>,
}

impl<'c, 'a, S, St, C, const N: usize, const CH: usize, const Q: usize, const D: usize>
    Recorder<'c, 'a, S, St, C, N, CH, Q, D>
where
    S: Sample,
    St: Storage,
    C: Clock,
{
    pub fn new(
        capture: &'c Capture<'a, S, N, CH, Q>,
        storage: St,
        clock: C,
        config: Config,
    ) -> Result<Self, Error> {
        config.validate()?;
        Config::validate_frame(CH * S::WIDTH)?;
        let now = clock.now();
        Ok(Recorder {
            capture,
            file: FileLifecycle::new(storage, config.file_prefix, config.preallocate_bytes),
            disk: DiskAggregator::new(),
            scheduler: Scheduler::new(config.schedule),
            clock,
            config,
            stopped: false,
            last_data: now,
            second: now,
            current: Stats::default(),
            totals: Totals {
                dropped: capture.dropped(),
                flushes: 0,
            },
            last_report: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn file(&self) -> &FileLifecycle<St> {
        &self.file
    }

    pub fn storage(&self) -> &St {
        self.file.storage()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Bytes sitting in the disk buffer.
    pub fn buffered(&self) -> usize {
        self.disk.cursor()
    }

    /// Counters of the last completed second.
    pub fn last_report(&self) -> Option<Stats> {
        self.last_report
    }

    /// Boot. Goes straight back to sleep outside the recording period,
    /// before the card is powered.
    pub fn start(&mut self) -> Result<Step, Error> {
        let now = self.clock.now();
        info!("boot at {}", calendar::to_calendar(now));
        if let Some(seconds) = self.scheduler.sleep_needed(now) {
            info!("outside recording period, sleeping {} s", seconds);
            return Ok(Step::Sleep { seconds });
        }
        self.file.init()?;
        let stale = self.capture.discard_pending();
        if stale > 0 {
            debug!("discarded {} blocks captured before the card was ready", stale);
        }
        self.last_data = now;
        self.second = now;
        Ok(Step::Idle)
    }

    /// One loop pass.
    pub fn poll(&mut self) -> Result<Step, Error> {
        let started = self.clock.ticks();
        let now = self.clock.now();
        self.current.loops = self.current.loops.wrapping_add(1);

        let step = self.pass(now)?;
        if let Step::Sleep { .. } = step {
            return Ok(step);
        }
        let elapsed = self.clock.ticks().wrapping_sub(started) / C::TICKS_PER_US;
        self.current.max_loop_us = self.current.max_loop_us.max(elapsed);
        self.report(now);
        Ok(step)
    }

    fn pass(&mut self, now: u32) -> Result<Step, Error> {
        if self.stopped {
            self.capture.discard_pending();
            return Ok(Step::Stopped);
        }

        let mut step = Step::Idle;
        match self.scheduler.tick(now) {
            Decision::SleepFor(seconds) => {
                info!("end of recording period, sleeping {} s", seconds);
                self.shut_down()?;
                return Ok(Step::Sleep { seconds });
            }
            Decision::RotateNow if !self.file.is_closed() => {
                self.close_file()?;
                step = Step::Rotated;
            }
            _ => {}
        }

        if self.capture.frames_ready() {
            self.last_data = now;
            if self.file.is_closed() {
                self.open_file(now)?;
            }
            self.record_blocks()?;
            if step == Step::Idle {
                step = Step::Recorded;
            }
        } else if now.saturating_sub(self.last_data) >= self.config.watchdog_secs {
            warn!(
                "no audio for {} s, restarting after {} s",
                now - self.last_data,
                self.config.recovery_sleep_secs
            );
            self.shut_down()?;
            return Ok(Step::Sleep {
                seconds: self.config.recovery_sleep_secs,
            });
        }
        Ok(step)
    }

    /// Boot, then serve the console and poll until the schedule, the
    /// operator or an error ends the session.
    pub fn run<T: Terminal>(
        &mut self,
        power: &mut impl PowerControl,
        console: &mut Console<T>,
    ) -> ! {
        let mut step = self.start();
        loop {
            match step {
                Ok(Step::Sleep { seconds }) => power.sleep_for(seconds),
                Err(err) => {
                    error!("{}", err);
                    power.halt()
                }
                Ok(_) => {}
            }
            step = match self.service(console) {
                Ok(Some(seconds)) => Ok(Step::Sleep { seconds }),
                Ok(None) => self.poll(),
                Err(err) => Err(err),
            };
        }
    }

    /// Execute every command line received since the last call. Rejected
    /// input and invalid settings are answered on the console. Returns the
    /// hibernation an `x<n>` asked for; the card is already released then.
    pub fn service<T: Terminal>(&mut self, console: &mut Console<T>) -> Result<Option<u32>, Error> {
        while let Some(line) = console.next_command() {
            let command = match line {
                Ok(command) => command,
                Err(err) => {
                    console.error(&err);
                    continue;
                }
            };
            debug!("console {:?}", command);
            match self.execute(command) {
                Ok(reply) => {
                    console.reply(&reply);
                    if let Reply::Hibernate(seconds) = reply {
                        return Ok(Some(seconds));
                    }
                }
                Err(err @ Error::Config(_)) => console.error(&err),
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Operator stop: the file is closed and capture data is discarded until
    /// [`resume`](Self::resume).
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.stopped {
            return Ok(());
        }
        self.close_file()?;
        self.capture.discard_pending();
        self.stopped = true;
        info!("acquisition stopped");
        Ok(())
    }

    pub fn resume(&mut self) {
        if self.stopped {
            self.stopped = false;
            self.last_data = self.clock.now();
            info!("acquisition resumed");
        }
    }

    /// Takes effect on the next pass. The open file keeps its header.
    pub fn set_schedule(&mut self, window: ScheduleWindow) -> Result<(), Error> {
        window.validate()?;
        self.config.schedule = window;
        self.scheduler.set_window(window);
        info!(
            "schedule on {} s off {} s file {} s",
            window.on_secs, window.off_secs, window.rotation_secs
        );
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> Result<Reply, Error> {
        let now = self.clock.now();
        let window = self.config.schedule;
        let reply = match command {
            Command::ReportAll => Reply::Settings {
                window,
                now: calendar::to_calendar(now),
                stopped: self.stopped,
            },
            Command::Query(field) => match field {
                Field::On => Reply::Seconds(field, window.on_secs),
                Field::Off => Reply::Seconds(field, window.off_secs),
                Field::Rotation => Reply::Seconds(field, window.rotation_secs),
                Field::Date => Reply::Date(calendar::to_calendar(now)),
                Field::Time => Reply::Time(calendar::to_calendar(now)),
            },
            Command::Set(setting) => {
                self.apply(setting, now)?;
                Reply::Done
            }
            Command::Stop => {
                self.stop()?;
                Reply::Stopped
            }
            Command::Continue => {
                self.resume();
                Reply::Started
            }
            Command::Leave(Some(seconds)) => {
                self.shut_down()?;
                Reply::Hibernate(seconds)
            }
            Command::Leave(None) => {
                self.resume();
                Reply::Started
            }
        };
        Ok(reply)
    }

    fn apply(&mut self, setting: Setting, now: u32) -> Result<(), Error> {
        let mut window = self.config.schedule;
        let today = calendar::to_calendar(now);
        let target = match setting {
            Setting::On(seconds) => {
                window.on_secs = seconds;
                return self.set_schedule(window);
            }
            Setting::Off(seconds) => {
                window.off_secs = seconds;
                return self.set_schedule(window);
            }
            Setting::Rotation(seconds) => {
                window.rotation_secs = seconds;
                return self.set_schedule(window);
            }
            Setting::Date { year, month, day } => DateTime {
                year,
                month,
                day,
                ..today
            },
            Setting::Time {
                hour,
                minute,
                second,
            } => DateTime {
                hour,
                minute,
                second,
                ..today
            },
        };
        if !target.is_valid() {
            return Err(Error::Config("date or time out of range"));
        }
        // a jump in time must not look like a stall or a rotation
        let epoch = target.to_epoch();
        self.clock.set(epoch);
        self.last_data = epoch;
        self.second = epoch;
        self.scheduler.set_window(window);
        info!("clock set to {}", target);
        Ok(())
    }

    fn open_file(&mut self, now: u32) -> Result<(), Error> {
        self.file.open(now)?;
        let header = FileHeader {
            magic: self.config.magic,
            created: now,
            sample_rate: self.config.sample_rate,
            on_secs: self.config.schedule.on_secs,
            off_secs: self.config.schedule.off_secs,
            rotation_secs: self.config.schedule.rotation_secs,
            windows: self.config.schedule.daily.header_hours(),
            channels: CH as u16,
            bytes_per_sample: S::WIDTH as u16,
            input: self.config.input.code(),
            mic_gain_db: self.config.mic_gain_db as u16,
        };
        self.disk.clear();
        self.disk
            .append(&header.encode(), |buf| self.file.write(buf))
    }

    /// Pop one block per channel and append them frame by frame.
    fn record_blocks(&mut self) -> Result<(), Error> {
        let mut blocks = [[S::ZERO; N]; CH];
        for (channel, samples) in blocks.iter_mut().enumerate() {
            if let Some(block) = self.capture.read_buffer(channel) {
                self.capture.copy_block(&block, samples);
                self.capture.free_buffer(block);
            }
        }

        let mut scratch = [0u8; SCRATCH_BYTES];
        let mut fill = 0;
        for n in 0..N {
            for samples in &blocks {
                if fill + S::WIDTH > SCRATCH_BYTES {
                    self.disk
                        .append(&scratch[..fill], |buf| self.file.write(buf))?;
                    fill = 0;
                }
                samples[n].put_le(&mut scratch[fill..fill + S::WIDTH]);
                fill += S::WIDTH;
            }
        }
        self.disk
            .append(&scratch[..fill], |buf| self.file.write(buf))?;
        self.current.blocks = self.current.blocks.wrapping_add(1);
        Ok(())
    }

    fn close_file(&mut self) -> Result<(), Error> {
        if self.file.is_closed() {
            return Ok(());
        }
        self.disk.flush_partial(|buf| self.file.write(buf))?;
        self.file.close()
    }

    /// Close the file and release the card before power down.
    fn shut_down(&mut self) -> Result<(), Error> {
        self.close_file()?;
        self.file.exit()
    }

    fn report(&mut self, now: u32) {
        if now == self.second {
            return;
        }
        self.second = now;
        let pool = self.capture.pool();
        let totals = Totals {
            dropped: self.capture.dropped(),
            flushes: self.disk.flushes(),
        };
        self.current.dropped = totals.dropped.wrapping_sub(self.totals.dropped);
        self.current.flushes = totals.flushes.wrapping_sub(self.totals.flushes);
        self.current.pool_high_water = pool.high_water();
        self.totals = totals;
        pool.reset_high_water();
        let stats = core::mem::take(&mut self.current);
        info!(
            "loops {} blocks {} pool {}/{} flushes {} dropped {} max {} us file {} ({} bytes)",
            stats.loops,
            stats.blocks,
            stats.pool_high_water,
            pool.capacity(),
            stats.flushes,
            stats.dropped,
            stats.max_loop_us,
            self.file.name(),
            self.file.bytes_written()
        );
        if stats.dropped > 0 {
            warn!("{} blocks dropped", stats.dropped);
        }
        self.last_report = Some(stats);
    }
}
