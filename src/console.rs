//! Operator commands, one per line.
//!
//! ```text
//! a              print all settings
//! ?o ?f ?c       query on, off and file (rotation) seconds
//! ?d ?t          query RTC date and time
//! !o60 !f240     set on and off seconds
//! !c30           set file rotation seconds
//! !d2026/10/19   set RTC date
//! !t12:00:00     set RTC time
//! :s :c          stop and continue acquisition
//! x10 x-1        leave the menu: hibernate 10 s, or start immediately
//! ```
//!
//! Lines end with CR or LF. [`Console`] collects them from any byte
//! [`Terminal`] and answers with CR LF.
use core::fmt::{self, Write};

use thiserror::Error;

use crate::{calendar::DateTime, schedule::ScheduleWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    On,
    Off,
    Rotation,
    Date,
    Time,
}

impl Field {
    fn from_char(c: char) -> Result<Self, ConsoleError> {
        match c {
            'o' => Ok(Field::On),
            'f' => Ok(Field::Off),
            'c' => Ok(Field::Rotation),
            'd' => Ok(Field::Date),
            't' => Ok(Field::Time),
            other => Err(ConsoleError::UnknownField(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    On(u32),
    Off(u32),
    Rotation(u32),
    Date { year: u16, month: u8, day: u8 },
    Time { hour: u8, minute: u8, second: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ReportAll,
    Query(Field),
    Set(Setting),
    Stop,
    Continue,
    /// Leave the menu; `Some(n)` hibernates `n` seconds first.
    Leave(Option<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(char),
    #[error("unknown field '{0}'")]
    UnknownField(char),
    #[error("expected a number")]
    BadNumber,
    #[error("expected YYYY/MM/DD")]
    BadDate,
    #[error("expected HH:MM:SS")]
    BadTime,
    #[error("line too long")]
    TooLong,
    #[error("line is not text")]
    NotText,
}

/// Three numbers of at most `widths` digits each, separated by `sep`.
fn triple(text: &str, sep: char, widths: [usize; 3]) -> Option<[u32; 3]> {
    let mut parts = text.split(sep);
    let mut out = [0; 3];
    for (value, width) in out.iter_mut().zip(widths) {
        let part = parts.next()?;
        if part.is_empty() || part.len() > width || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *value = part.parse().ok()?;
    }
    parts.next().is_none().then_some(out)
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let line = line.trim();
        let mut chars = line.chars();
        let head = chars.next().ok_or(ConsoleError::Empty)?;
        let rest = chars.as_str();
        match head {
            'a' => Ok(Command::ReportAll),
            '?' => {
                let c = rest.chars().next().ok_or(ConsoleError::Empty)?;
                Field::from_char(c).map(Command::Query)
            }
            '!' => {
                let c = rest.chars().next().ok_or(ConsoleError::Empty)?;
                let value = rest[c.len_utf8()..].trim();
                let seconds = || value.parse::<u32>().map_err(|_| ConsoleError::BadNumber);
                let setting = match Field::from_char(c)? {
                    Field::On => Setting::On(seconds()?),
                    Field::Off => Setting::Off(seconds()?),
                    Field::Rotation => Setting::Rotation(seconds()?),
                    Field::Date => {
                        let [year, month, day] =
                            triple(value, '/', [4, 2, 2]).ok_or(ConsoleError::BadDate)?;
                        Setting::Date {
                            year: year as u16,
                            month: month as u8,
                            day: day as u8,
                        }
                    }
                    Field::Time => {
                        let [hour, minute, second] =
                            triple(value, ':', [2, 2, 2]).ok_or(ConsoleError::BadTime)?;
                        Setting::Time {
                            hour: hour as u8,
                            minute: minute as u8,
                            second: second as u8,
                        }
                    }
                };
                Ok(Command::Set(setting))
            }
            ':' => match rest.chars().next() {
                Some('s') => Ok(Command::Stop),
                Some('c') => Ok(Command::Continue),
                Some(other) => Err(ConsoleError::UnknownCommand(other)),
                None => Err(ConsoleError::Empty),
            },
            'x' => {
                let delay = rest.trim().parse::<i64>().map_err(|_| ConsoleError::BadNumber)?;
                Ok(Command::Leave(
                    u32::try_from(delay).ok().filter(|&seconds| seconds > 0),
                ))
            }
            other => Err(ConsoleError::UnknownCommand(other)),
        }
    }
}

/// Longest accepted command line.
pub const LINE_BYTES: usize = 32;

/// Byte link to the operator.
pub trait Terminal: Write {
    /// Next received byte. Never blocks.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Line assembler and reply writer over a [`Terminal`].
pub struct Console<T> {
    port: T,
    line: [u8; LINE_BYTES],
    len: usize,
    overlong: bool,
}

impl<T: Terminal> Console<T> {
    pub const fn new(port: T) -> Self {
        Console {
            port,
            line: [0; LINE_BYTES],
            len: 0,
            overlong: false,
        }
    }

    pub fn port(&self) -> &T {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    /// Drain received bytes up to the next complete line and parse it.
    /// Blank lines are skipped; a partial line stays buffered.
    pub fn next_command(&mut self) -> Option<Result<Command, ConsoleError>> {
        while let Some(byte) = self.port.read_byte() {
            match byte {
                b'\r' | b'\n' => {
                    let len = core::mem::take(&mut self.len);
                    if core::mem::take(&mut self.overlong) {
                        return Some(Err(ConsoleError::TooLong));
                    }
                    match core::str::from_utf8(&self.line[..len]) {
                        Ok(text) if text.trim().is_empty() => {}
                        Ok(text) => return Some(Command::parse(text)),
                        Err(_) => return Some(Err(ConsoleError::NotText)),
                    }
                }
                _ if self.len < LINE_BYTES => {
                    self.line[self.len] = byte;
                    self.len += 1;
                }
                _ => self.overlong = true,
            }
        }
        None
    }

    pub fn reply(&mut self, reply: &Reply) {
        self.send(format_args!("{reply}"));
    }

    pub fn error(&mut self, err: &dyn fmt::Display) {
        self.send(format_args!("error: {err}"));
    }

    fn send(&mut self, args: fmt::Arguments<'_>) {
        // nobody may be listening
        let _ = self
            .port
            .write_fmt(args)
            .and_then(|()| self.port.write_str("\r\n"));
    }
}

/// Answer printed back to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Settings {
        window: ScheduleWindow,
        now: DateTime,
        stopped: bool,
    },
    Seconds(Field, u32),
    Date(DateTime),
    Time(DateTime),
    Stopped,
    Started,
    Hibernate(u32),
    Done,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Settings {
                window,
                now,
                stopped,
            } => {
                writeln!(f, "now      {now}")?;
                writeln!(f, "on       {} s", window.on_secs)?;
                writeln!(f, "off      {} s", window.off_secs)?;
                writeln!(f, "file     {} s", window.rotation_secs)?;
                writeln!(f, "windows  {:?}", window.daily)?;
                write!(f, "acq      {}", if *stopped { "stopped" } else { "running" })
            }
            Reply::Seconds(field, value) => {
                let name = match field {
                    Field::On => "on",
                    Field::Off => "off",
                    Field::Rotation => "file",
                    Field::Date => "date",
                    Field::Time => "time",
                };
                write!(f, "{name} {value} s")
            }
            Reply::Date(dt) => write!(f, "{:04}/{:02}/{:02}", dt.year, dt.month, dt.day),
            Reply::Time(dt) => write!(f, "{:02}:{:02}:{:02}", dt.hour, dt.minute, dt.second),
            Reply::Stopped => f.write_str("Stop"),
            Reply::Started => f.write_str("Start"),
            Reply::Hibernate(seconds) => write!(f, "hibernate {seconds} s"),
            Reply::Done => f.write_str("ok"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        let cases = [
            ("a", Command::ReportAll),
            ("?o", Command::Query(Field::On)),
            ("?f", Command::Query(Field::Off)),
            ("?c", Command::Query(Field::Rotation)),
            ("?d", Command::Query(Field::Date)),
            ("?t\r\n", Command::Query(Field::Time)),
            ("!o60", Command::Set(Setting::On(60))),
            ("!f 240", Command::Set(Setting::Off(240))),
            ("!c30", Command::Set(Setting::Rotation(30))),
            (
                "!d2026/10/19",
                Command::Set(Setting::Date {
                    year: 2026,
                    month: 10,
                    day: 19,
                }),
            ),
            (
                "!t07:05:00",
                Command::Set(Setting::Time {
                    hour: 7,
                    minute: 5,
                    second: 0,
                }),
            ),
            (":s", Command::Stop),
            (":c", Command::Continue),
            ("x10", Command::Leave(Some(10))),
            ("x-1", Command::Leave(None)),
            ("x0", Command::Leave(None)),
        ];
        for (line, expected) in cases {
            assert_eq!(Command::parse(line), Ok(expected), "{line:?}");
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Command::parse("  "), Err(ConsoleError::Empty));
        assert_eq!(Command::parse("q"), Err(ConsoleError::UnknownCommand('q')));
        assert_eq!(Command::parse("?g"), Err(ConsoleError::UnknownField('g')));
        assert_eq!(Command::parse("!o-5"), Err(ConsoleError::BadNumber));
        assert_eq!(Command::parse("!d2026-10-19"), Err(ConsoleError::BadDate));
        assert_eq!(Command::parse("!d2026/10/19/1"), Err(ConsoleError::BadDate));
        assert_eq!(Command::parse("!t7:5"), Err(ConsoleError::BadTime));
        assert_eq!(Command::parse(":q"), Err(ConsoleError::UnknownCommand('q')));
        assert_eq!(Command::parse("xabc"), Err(ConsoleError::BadNumber));
    }

    /// Scripted input, captured output.
    struct Script {
        input: std::collections::VecDeque<u8>,
        output: String,
    }

    impl Script {
        fn new(input: &str) -> Self {
            Script {
                input: input.bytes().collect(),
                output: String::new(),
            }
        }
    }

    impl Write for Script {
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

    #[test]
    fn assembles_lines_across_reads() {
        let mut console = Console::new(Script::new("?o\r\n\n:s\r!c3"));
        assert_eq!(console.next_command(), Some(Ok(Command::Query(Field::On))));
        assert_eq!(console.next_command(), Some(Ok(Command::Stop)));
        assert_eq!(console.next_command(), None);

        console.port_mut().input.extend(b"0\n");
        assert_eq!(
            console.next_command(),
            Some(Ok(Command::Set(Setting::Rotation(30))))
        );
    }

    #[test]
    fn overlong_line_is_rejected_whole() {
        let long = "!o".to_string() + &"9".repeat(LINE_BYTES) + "\na\n";
        let mut console = Console::new(Script::new(&long));
        assert_eq!(console.next_command(), Some(Err(ConsoleError::TooLong)));
        assert_eq!(console.next_command(), Some(Ok(Command::ReportAll)));
    }

    #[test]
    fn replies_end_with_crlf() {
        let mut console = Console::new(Script::new(""));
        console.reply(&Reply::Done);
        console.error(&ConsoleError::BadTime);
        assert_eq!(console.port().output, "ok\r\nerror: expected HH:MM:SS\r\n");
    }

    #[test]
    fn replies_render() {
        let dt = DateTime {
            year: 2026,
            month: 10,
            day: 19,
            hour: 7,
            minute: 5,
            second: 0,
        };
        assert_eq!(Reply::Date(dt).to_string(), "2026/10/19");
        assert_eq!(Reply::Time(dt).to_string(), "07:05:00");
        assert_eq!(Reply::Seconds(Field::Rotation, 30).to_string(), "file 30 s");
        assert_eq!(Reply::Stopped.to_string(), "Stop");
        let all = Reply::Settings {
            window: ScheduleWindow::CONTINUOUS,
            now: dt,
            stopped: false,
        }
        .to_string();
        assert!(all.starts_with("now      2026-10-19 07:05:00\n"));
        assert!(all.ends_with("acq      running"));
    }
}
