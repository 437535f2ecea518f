use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};


/// An enum representing the level of a log.
/// Debug logs are messages to a developer, Info logs are messages to a user,
/// and Warn logs are messages to a user about something they probably want to fix
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Level {
    /// Designates messages to a developer who needs to debug the application
    Debug,

    /// Designates messages to a user who is using the tool
    Info,

    /// Designates messages about a recoverable problem, e.g. an ignored config key
    Warn,
}

impl Level {
    fn to_str(&self) -> &str {
        return match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
        };
    }
}

/// Where records end up once they've been formatted
enum Sink {
    /// Debug records go to stderr, everything else to stdout
    Std,

    /// Everything is appended to a file
    File(Mutex<File>),

    /// Everything is dropped
    Discard,
}

static SINK: OnceLock<Sink> = OnceLock::new();
static GLOBAL_DEBUG: AtomicBool = AtomicBool::new(false);

/// Sends every record from every logger in this process to the file at `path`, opened in append mode.
/// Only the first call to any of the sink setters takes effect
pub fn log_to_file(path: &Path) -> Result<(), io::Error> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _ = SINK.set(Sink::File(Mutex::new(file)));
    return Ok(());
}

/// Drops every record from every logger in this process
pub fn discard_logs() {
    let _ = SINK.set(Sink::Discard);
}

/// Turns on debug records for every logger, regardless of their own debug mode
pub fn set_global_debug(enabled: bool) {
    GLOBAL_DEBUG.store(enabled, Ordering::Relaxed);
}

/// A trait representing the ability to output a log record in some format
pub trait RecordWriter {
    /// Takes a record and writes it to `out` in some format. Optionally includes the logger name in the payload
    fn write_record<T>(&self, out: &mut T, logger_name: &str, record: &Record<Self>) -> Result<(), io::Error>
    where
        T: Write,
        Self: Sized;
}

fn json_string(value: &str) -> String {
    return serde_json::Value::String(value.to_owned()).to_string();
}

/// A struct which represents a `RecordWriter` that outputs logs in ndjson format
/// i.e. logs are in JSON format, one per line
/// For any daemons, or non interactive software where humans aren't going to be directly reading the logs
/// this is the one to use
pub struct JSONRecordWriter {}
impl RecordWriter for JSONRecordWriter {
    fn write_record<T>(&self, out: &mut T, logger_name: &str, record: &Record<Self>) -> Result<(), io::Error>
    where
        T: Write,
        Self: Sized,
    {
        let mut line = String::from("{");
        for (key, value) in &record.kvs {
            line.push_str(&format!("{}: {}, ", json_string(key), json_string(value)));
        }

        line.push_str(&format!("\"level\": \"{}\", ", record.level.to_str()));
        line.push_str(&format!("\"logger_name\": {}, ", json_string(logger_name)));
        line.push_str(&format!("\"message\": {}", json_string(&record.message)));
        line.push_str("}\n");

        out.write_all(line.as_bytes())?;
        out.flush()?;
        return Ok(());
    }
}

/// Foreground colours the console writer paints with
#[derive(Debug, Clone, Copy)]
enum Color {
    Green,
    Red,
    Yellow,
    Grey,
    BrightWhite,
    Reset,
}

impl Color {
    fn escape(&self) -> &'static str {
        return match self {
            Color::Green => "\x1b[38;5;2m",
            Color::Red => "\x1b[38;5;1m",
            Color::Yellow => "\x1b[38;5;3m",
            Color::Grey => "\x1b[38;2;160;160;160m",
            Color::BrightWhite => "\x1b[38;5;15m",
            Color::Reset => "\x1b[39m",
        };
    }
}

fn paint<T: Write>(out: &mut T, color: Color) -> Result<(), io::Error> {
    return out.write_all(color.escape().as_bytes());
}

/// A struct which represents a `RecordWriter` that outputs logs in a human readable format
/// This should be used for user facing applications where humans are expected to read the output
pub struct ConsoleRecordWriter {}
impl RecordWriter for ConsoleRecordWriter {
    fn write_record<T>(&self, out: &mut T, _logger_name: &str, record: &Record<Self>) -> Result<(), io::Error>
    where
        T: Write,
        Self: Sized,
    {
        match record.level {
            Level::Info => {
                paint(out, Color::Green)?;
                out.write_all(b"INF ")?;
            }
            Level::Warn => {
                paint(out, Color::Red)?;
                out.write_all(b"WRN ")?;
            }
            Level::Debug => {
                paint(out, Color::Yellow)?;
                out.write_all(b"DBG ")?;
            }
        }

        paint(out, Color::BrightWhite)?;
        out.write_all(record.message.as_bytes())?;
        for (key, value) in &record.kvs {
            out.write_all(b" ")?;
            paint(out, Color::Grey)?;
            out.write_all(key.as_bytes())?;
            out.write_all(b"=")?;
            paint(out, Color::BrightWhite)?;
            out.write_all(value.as_bytes())?;
        }
        out.write_all(b"\n")?;

        paint(out, Color::Reset)?;
        out.flush()?;
        return Ok(());
    }
}

/// A struct which has the ability to create records and filter them by a given level.
pub struct Logger<T>
where
    T: RecordWriter,
{
    name: String,
    debug_enabled: bool,
    writer: T,
}

/// A struct which holds all the information of a log message to be outputted.
/// Key/Value pairs are kept in insertion order
pub struct Record<'a, T>
where
    T: RecordWriter,
{
    logger: &'a Logger<T>,
    message: String,
    level: Level,
    kvs: Vec<(String, String)>,
}

impl<'a, T> Record<'a, T>
where
    T: RecordWriter,
{
    fn new(logger: &'a Logger<T>, level: Level) -> Record<'a, T> {
        return Record {
            logger: logger,
            message: String::new(),
            level: level,
            kvs: Vec::new(),
        };
    }

    pub fn with_str(mut self, key: &str, value: &str) -> Self {
        self.kvs.push((key.to_owned(), value.to_owned()));
        return self;
    }

    pub fn with_string(mut self, key: &str, value: String) -> Self {
        self.kvs.push((key.to_owned(), value));
        return self;
    }

    pub fn with_i32(self, key: &str, value: i32) -> Self {
        return self.with_i64(key, value as i64);
    }

    pub fn with_i64(mut self, key: &str, value: i64) -> Self {
        self.kvs.push((key.to_owned(), value.to_string()));
        return self;
    }

    pub fn with_u32(self, key: &str, value: u32) -> Self {
        return self.with_u64(key, value as u64);
    }

    pub fn with_u64(mut self, key: &str, value: u64) -> Self {
        self.kvs.push((key.to_owned(), value.to_string()));
        return self;
    }

    /// Sets the message without emitting the record
    pub fn with_message(mut self, msg: &str) -> Self {
        self.message = msg.to_owned();
        return self;
    }

    pub fn level(&self) -> Level {
        return self.level;
    }

    pub fn message(&self) -> &str {
        return &self.message;
    }

    pub fn fields(&self) -> &[(String, String)] {
        return &self.kvs;
    }

    pub fn msg(mut self, msg: String) {
        self.message = msg;
        // A logger that can't write has nowhere to report that to
        let _ = self.logger.write_record(&self);
    }

    pub fn smsg(self, msg: &str) {
        self.msg(msg.to_owned());
    }
}

pub fn with_name_as_json(name: &str) -> Logger<JSONRecordWriter> {
    return with_name_and_format(name, JSONRecordWriter {});
}

pub fn with_name_as_console(name: &str) -> Logger<ConsoleRecordWriter> {
    return with_name_and_format(name, ConsoleRecordWriter {});
}

pub fn with_name_and_format<T>(name: &str, format: T) -> Logger<T>
where
    T: RecordWriter,
{
    return Logger {
        name: name.to_owned(),
        debug_enabled: false,
        writer: format,
    };
}

impl<T> Logger<T>
where
    T: RecordWriter,
{
    pub fn set_debug_mode(&mut self, enabled: bool) {
        self.debug_enabled = enabled;
    }

    pub fn name(&self) -> &str {
        return &self.name;
    }

    pub fn info<'a>(&'a self) -> Record<'a, T> {
        return Record::new(self, Level::Info);
    }

    pub fn warn<'a>(&'a self) -> Record<'a, T> {
        return Record::new(self, Level::Warn);
    }

    pub fn debug<'a>(&'a self) -> Record<'a, T> {
        return Record::new(self, Level::Debug);
    }

    /// Formats the record into `out`, ignoring the process-wide sink
    pub fn format_record<W: Write>(&self, out: &mut W, record: &Record<T>) -> Result<(), io::Error> {
        return self.writer.write_record(out, &self.name, record);
    }

    pub fn write_record(&self, record: &Record<T>) -> Result<(), io::Error> {
        if record.level == Level::Debug && !self.debug_enabled && !GLOBAL_DEBUG.load(Ordering::Relaxed) {
            return Ok(());
        }

        match SINK.get().unwrap_or(&Sink::Std) {
            Sink::Discard => {}
            Sink::File(file) => {
                let mut file = match file.lock() {
                    Ok(file) => file,
                    Err(poisoned) => poisoned.into_inner(),
                };
                self.writer.write_record(&mut *file, &self.name, record)?;
            }
            Sink::Std => {
                if record.level == Level::Debug {
                    self.writer.write_record(&mut io::stderr(), &self.name, record)?;
                } else {
                    self.writer.write_record(&mut io::stdout(), &self.name, record)?;
                }
            }
        }

        return Ok(());
    }
}
