use std::{
    cell::Cell,
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::Rc,
};

use daisy_logger::{
    capture::{Capture, Route},
    config::Config,
    console::{Command, Console, Field, Reply, Terminal},
    error::StorageOp,
    file::FileState,
    header::{FileHeader, HEADER_LEN},
    pool::Slot,
    recorder::{Clock, Recorder, Step},
    schedule::ScheduleWindow,
    storage::Storage,
    Error, StorageError,
};

const N: usize = 128;
const BLOCK_BYTES: usize = N * 2;
const DISK: usize = 1024;
/// 2026-10-19 12:00:00
const NOON: u32 = 1_792_411_200;

const LEFT: &[Route] = &[Route::new(0, 0)];

#[derive(Default)]
struct MemStorage {
    cwd: String,
    files: BTreeMap<String, Vec<u8>>,
    open: Option<String>,
    chdirs: Vec<String>,
    writes: Vec<usize>,
    preallocated: Vec<u64>,
    inits: u32,
    exits: u32,
    fail_writes: bool,
}

impl MemStorage {
    fn file(&self, path: &str) -> &[u8] {
        self.files
            .get(path)
            .unwrap_or_else(|| panic!("{path} missing, have {:?}", self.files.keys()))
    }
}

impl Storage for MemStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        self.inits += 1;
        Ok(())
    }

    fn change_dir(&mut self, path: &str) -> Result<(), StorageError> {
        self.cwd = path.to_string();
        self.chdirs.push(path.to_string());
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<(), StorageError> {
        let path = format!("{}/{}", self.cwd, name);
        self.files.insert(path.clone(), Vec::new());
        self.open = Some(path);
        Ok(())
    }

    fn preallocate(&mut self, bytes: u64) -> Result<(), StorageError> {
        self.preallocated.push(bytes);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        if self.fail_writes {
            return Err(StorageError::Io);
        }
        let path = self.open.as_ref().ok_or(StorageError::NotOpen)?;
        self.files.entry(path.clone()).or_default().extend_from_slice(buf);
        self.writes.push(buf.len());
        Ok(buf.len())
    }

    fn truncate_and_close(&mut self) -> Result<(), StorageError> {
        self.open.take().map(|_| ()).ok_or(StorageError::NotOpen)
    }

    fn exit(&mut self) -> Result<(), StorageError> {
        self.exits += 1;
        Ok(())
    }
}

/// Seconds move only when the test says so. The loop counter moves
/// `tick_step` on every read, so each pass takes exactly one step.
#[derive(Clone)]
struct FakeClock {
    epoch: Rc<Cell<u32>>,
    ticks: Rc<Cell<u32>>,
    tick_step: Rc<Cell<u32>>,
}

impl FakeClock {
    fn at(epoch: u32) -> Self {
        FakeClock {
            epoch: Rc::new(Cell::new(epoch)),
            ticks: Rc::new(Cell::new(u32::MAX - 1000)),
            tick_step: Rc::new(Cell::new(0)),
        }
    }

    fn advance(&self, seconds: u32) {
        self.epoch.set(self.epoch.get() + seconds);
    }

    fn pass_takes(&self, ticks: u32) {
        self.tick_step.set(ticks);
    }
}

impl Clock for FakeClock {
    const TICKS_PER_US: u32 = 2;

    fn now(&self) -> u32 {
        self.epoch.get()
    }

    fn set(&mut self, epoch: u32) {
        self.epoch.set(epoch);
    }

    fn ticks(&self) -> u32 {
        let now = self.ticks.get();
        self.ticks.set(now.wrapping_add(self.tick_step.get()));
        now
    }
}

/// Operator input fed in advance, replies collected.
#[derive(Default)]
struct Script {
    input: VecDeque<u8>,
    output: String,
}

impl Script {
    fn typed(input: &str) -> Self {
        Script {
            input: input.bytes().collect(),
            output: String::new(),
        }
    }
}

impl fmt::Write for Script {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.output.push_str(s);
        Ok(())
    }
}

impl Terminal for Script {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

type Rec<'c, 'a> = Recorder<'c, 'a, i16, MemStorage, FakeClock, N, 1, 8, DISK>;
type Cap<'a> = Capture<'a, i16, N, 1, 8>;

/// Stereo frame whose left channel counts up from `base`.
fn feed(capture: &Cap<'_>, base: i16) {
    let mut frame = [0i16; N * 2];
    for n in 0..N {
        frame[2 * n] = base.wrapping_add(n as i16);
        frame[2 * n + 1] = -1;
    }
    capture.on_frame(&frame);
}

fn config(window: ScheduleWindow) -> Config {
    Config {
        schedule: window,
        ..Config::DEFAULT
    }
}

fn window(on_secs: u32, off_secs: u32, rotation_secs: u32) -> ScheduleWindow {
    ScheduleWindow {
        on_secs,
        off_secs,
        rotation_secs,
        ..ScheduleWindow::CONTINUOUS
    }
}

#[test]
fn header_then_sector_aligned_payload() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock, Config::DEFAULT).unwrap();

    assert_eq!(rec.start(), Ok(Step::Idle));
    for block in 0..3 {
        feed(&capture, block * 1000);
        assert_eq!(rec.poll(), Ok(Step::Recorded));
    }
    assert_eq!(rec.storage().writes, [DISK]);
    assert_eq!(rec.buffered(), BLOCK_BYTES);
    assert_eq!(rec.file().state(), FileState::Writing);

    rec.stop().unwrap();
    let storage = rec.storage();
    assert_eq!(storage.writes, [DISK, BLOCK_BYTES]);
    assert_eq!(storage.chdirs, ["/20261019/12"]);
    assert_eq!(storage.preallocated, [8 << 20]);

    let data = storage.file("/20261019/12/A120000.BIN");
    assert_eq!(data.len(), HEADER_LEN + 3 * BLOCK_BYTES);
    let header = FileHeader::decode(data).unwrap();
    assert_eq!(&header.magic, b"ALOG");
    assert_eq!(header.created, NOON);
    assert_eq!(header.sample_rate, 48_000);
    assert_eq!((header.on_secs, header.off_secs, header.rotation_secs), (60, 0, 60));
    assert_eq!((header.channels, header.bytes_per_sample), (1, 2));

    let payload = &data[HEADER_LEN..];
    for (block, chunk) in payload.chunks(BLOCK_BYTES).enumerate() {
        let first = i16::from_le_bytes([chunk[0], chunk[1]]);
        let last = i16::from_le_bytes([chunk[BLOCK_BYTES - 2], chunk[BLOCK_BYTES - 1]]);
        assert_eq!(first, block as i16 * 1000);
        assert_eq!(last, block as i16 * 1000 + N as i16 - 1);
    }
}

#[test]
fn rotation_starts_a_new_file() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(
        &capture,
        MemStorage::default(),
        clock.clone(),
        config(window(60, 0, 10)),
    )
    .unwrap();
    rec.start().unwrap();

    let mut rotated_at = Vec::new();
    for k in 0..26 {
        feed(&capture, 0);
        if rec.poll().unwrap() == Step::Rotated {
            rotated_at.push(k);
        }
        clock.advance(1);
    }
    assert_eq!(rotated_at, [10, 20]);

    let storage = rec.storage();
    let names: Vec<_> = storage.files.keys().cloned().collect();
    assert_eq!(
        names,
        [
            "/20261019/12/A120000.BIN",
            "/20261019/12/A120010.BIN",
            "/20261019/12/A120020.BIN"
        ]
    );
    for closed in &names[..2] {
        assert_eq!(storage.file(closed).len(), HEADER_LEN + 10 * BLOCK_BYTES);
    }
    assert_eq!(storage.chdirs.len(), 1);
    assert_eq!(rec.file().files(), 3);
}

#[test]
fn hour_change_enters_a_new_directory() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON + 3590);
    let mut rec = Rec::new(
        &capture,
        MemStorage::default(),
        clock.clone(),
        config(window(60, 0, 20)),
    )
    .unwrap();
    rec.start().unwrap();
    for _ in 0..15 {
        feed(&capture, 0);
        rec.poll().unwrap();
        clock.advance(1);
    }
    let storage = rec.storage();
    assert_eq!(storage.chdirs, ["/20261019/12", "/20261019/13"]);
    assert!(storage.files.contains_key("/20261019/12/A125950.BIN"));
    assert!(storage.files.contains_key("/20261019/13/A130000.BIN"));
}

#[test]
fn duty_cycle_sleeps_at_end_of_on_time() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(
        &capture,
        MemStorage::default(),
        clock.clone(),
        config(window(60, 60, 0)),
    )
    .unwrap();
    rec.start().unwrap();

    for _ in 0..60 {
        feed(&capture, 0);
        assert_eq!(rec.poll(), Ok(Step::Recorded));
        clock.advance(1);
    }
    feed(&capture, 0);
    assert_eq!(rec.poll(), Ok(Step::Sleep { seconds: 60 }));
    assert!(rec.file().is_closed());
    assert_eq!(rec.buffered(), 0);

    let storage = rec.storage();
    assert_eq!(storage.exits, 1);
    assert!(storage.open.is_none());
    assert_eq!(
        storage.file("/20261019/12/A120000.BIN").len(),
        HEADER_LEN + 60 * BLOCK_BYTES
    );
}

#[test]
fn boot_during_off_time_sleeps_before_touching_the_card() {
    let mut slots = [Slot::<i16, N>::EMPTY; 4];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON + 90);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock, config(window(60, 60, 0))).unwrap();
    assert_eq!(rec.start(), Ok(Step::Sleep { seconds: 30 }));
    assert_eq!(rec.storage().inits, 0);
}

#[test]
fn watchdog_closes_the_file_after_a_stall() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock.clone(), Config::DEFAULT).unwrap();
    rec.start().unwrap();

    feed(&capture, 0);
    assert_eq!(rec.poll(), Ok(Step::Recorded));
    for _ in 1..10 {
        clock.advance(1);
        assert_eq!(rec.poll(), Ok(Step::Idle));
    }
    clock.advance(1);
    assert_eq!(rec.poll(), Ok(Step::Sleep { seconds: 10 }));

    let storage = rec.storage();
    assert_eq!(storage.exits, 1);
    assert_eq!(
        storage.file("/20261019/12/A120000.BIN").len(),
        HEADER_LEN + BLOCK_BYTES
    );
}

#[test]
fn operator_stop_drains_and_resume_reopens() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock.clone(), Config::DEFAULT).unwrap();
    rec.start().unwrap();

    feed(&capture, 0);
    rec.poll().unwrap();
    assert_eq!(rec.execute(Command::Stop), Ok(Reply::Stopped));
    assert!(rec.file().is_closed());

    // stopped long past the watchdog limit without sleeping
    for _ in 0..20 {
        feed(&capture, 0);
        clock.advance(1);
        assert_eq!(rec.poll(), Ok(Step::Stopped));
    }
    assert_eq!(capture.pool().in_use(), 0);
    assert_eq!(capture.queue(0).available(), 0);

    assert_eq!(rec.execute(Command::Continue), Ok(Reply::Started));
    feed(&capture, 0);
    assert_eq!(rec.poll(), Ok(Step::Recorded));
    assert_eq!(rec.file().name(), "A120020.BIN");
    assert_eq!(rec.storage().files.len(), 2);
}

#[test]
fn console_changes_schedule_and_clock() {
    let mut slots = [Slot::<i16, N>::EMPTY; 4];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock.clone(), Config::DEFAULT).unwrap();
    rec.start().unwrap();

    let mut run = |line: &str| Command::parse(line).map(|cmd| rec.execute(cmd));
    assert!(matches!(run("!o0"), Ok(Err(Error::Config(_)))));
    assert_eq!(run("!c30"), Ok(Ok(Reply::Done)));
    assert_eq!(run("?c"), Ok(Ok(Reply::Seconds(Field::Rotation, 30))));
    assert_eq!(run("!t08:30:00"), Ok(Ok(Reply::Done)));
    assert_eq!(run("!d2026/02/30"), Ok(Err(Error::Config("date or time out of range"))));
    assert!(matches!(run("?t"), Ok(Ok(Reply::Time(dt))) if dt.hour == 8 && dt.minute == 30));
    assert_eq!(run("x10"), Ok(Ok(Reply::Hibernate(10))));

    assert_eq!(clock.now(), NOON - 3 * 3600 - 30 * 60);
    assert_eq!(rec.config().schedule.rotation_secs, 30);
    assert_eq!(rec.storage().exits, 1);
}

#[test]
fn storage_failure_is_fatal() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let storage = MemStorage {
        fail_writes: true,
        ..MemStorage::default()
    };
    let mut rec = Rec::new(&capture, storage, FakeClock::at(NOON), Config::DEFAULT).unwrap();
    rec.start().unwrap();

    feed(&capture, 0);
    assert_eq!(rec.poll(), Ok(Step::Recorded));
    feed(&capture, 0);
    assert_eq!(
        rec.poll(),
        Err(Error::Storage {
            op: StorageOp::Write,
            source: StorageError::Io
        })
    );
}

#[test]
fn once_per_second_report() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock.clone(), Config::DEFAULT).unwrap();
    rec.start().unwrap();

    for _ in 0..10 {
        feed(&capture, 0);
    }
    clock.pass_takes(100);
    for pass in 0..3 {
        if pass == 2 {
            clock.pass_takes(900);
        }
        rec.poll().unwrap();
        clock.pass_takes(100);
    }
    assert_eq!(rec.last_report(), None);

    clock.advance(1);
    rec.poll().unwrap();
    let stats = rec.last_report().unwrap();
    assert_eq!(stats.loops, 4);
    assert_eq!(stats.blocks, 4);
    assert_eq!(stats.dropped, 2);
    // eight queued plus the one rejected by the full queue
    assert_eq!(stats.pool_high_water, 9);
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.max_loop_us, 450);
}

#[test]
fn report_counts_only_its_own_second() {
    let mut slots = [Slot::<i16, N>::EMPTY; 16];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock.clone(), Config::DEFAULT).unwrap();
    rec.start().unwrap();
    clock.pass_takes(100);

    // ten frames into a queue of eight
    for _ in 0..10 {
        feed(&capture, 0);
    }
    for _ in 0..3 {
        rec.poll().unwrap();
    }
    clock.advance(1);
    rec.poll().unwrap();
    assert_eq!(rec.last_report().unwrap().dropped, 2);

    // drain the other four blocks, one more flush
    for _ in 0..4 {
        assert_eq!(rec.poll(), Ok(Step::Recorded));
    }
    clock.advance(1);
    assert_eq!(rec.poll(), Ok(Step::Idle));
    let busy = rec.last_report().unwrap();
    assert_eq!((busy.loops, busy.blocks), (5, 4));
    assert_eq!((busy.flushes, busy.dropped), (1, 0));
    assert_eq!(busy.max_loop_us, 50);

    clock.advance(1);
    assert_eq!(rec.poll(), Ok(Step::Idle));
    let quiet = rec.last_report().unwrap();
    assert_eq!((quiet.loops, quiet.blocks), (1, 0));
    assert_eq!((quiet.flushes, quiet.dropped), (0, 0));

    assert_eq!(capture.dropped(), 2);
    assert_eq!(rec.storage().writes, [DISK, DISK]);
}

#[test]
fn console_lines_reach_the_recorder() {
    let mut slots = [Slot::<i16, N>::EMPTY; 4];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let clock = FakeClock::at(NOON);
    let mut rec = Rec::new(&capture, MemStorage::default(), clock.clone(), Config::DEFAULT).unwrap();
    rec.start().unwrap();

    let mut console = Console::new(Script::typed("?c\r\n!o0\r\nq\r\n:s\r\n"));
    assert_eq!(rec.service(&mut console), Ok(None));
    assert!(rec.is_stopped());
    assert_eq!(
        console.port().output,
        "file 60 s\r\n\
         error: invalid configuration: on time must be positive\r\n\
         error: unknown command 'q'\r\n\
         Stop\r\n"
    );

    // a partial line waits for its terminator
    console.port_mut().input.extend(b"!t08:00:00\rx1");
    assert_eq!(rec.service(&mut console), Ok(None));
    assert_eq!(clock.now(), NOON - 4 * 3600);
    console.port_mut().input.extend(b"20\n:c\n");
    assert_eq!(rec.service(&mut console), Ok(Some(120)));
    assert!(console.port().output.ends_with("ok\r\nhibernate 120 s\r\n"));
    assert_eq!(rec.storage().exits, 1);
    // the rest stays queued for the next boot pass
    assert_eq!(console.port().input.len(), 3);
}

#[test]
fn rejects_invalid_config() {
    let mut slots = [Slot::<i16, N>::EMPTY; 4];
    let capture = Cap::new(&mut slots, LEFT, 2).unwrap();
    let bad = Config {
        file_prefix: "TOO",
        ..Config::DEFAULT
    };
    assert!(Rec::new(&capture, MemStorage::default(), FakeClock::at(NOON), bad).is_err());
}
