use std::io::Write;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::{Lazy, OnceCell};

/// Flush when this many lines are queued.
const FLUSH_QD_LINES_THRESHOLD: usize = 10_000;

static VNET_LOGGER: Lazy<VnetLogger> = Lazy::new(VnetLogger::new);

/// Initialize the vnet logger.
pub fn init(max_log_level: LevelFilter) -> Result<(), SetLoggerError> {
    VNET_LOGGER.set_max_level(max_log_level);

    log::set_logger(&*VNET_LOGGER)?;
    log::set_max_level(max_log_level);

    // Arrange to flush the logger on panic.
    let default_panic_handler = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // ignore errors to avoid a recursive panic
        VNET_LOGGER.flush_records().ok();
        default_panic_handler(panic_info);
    }));

    Ok(())
}

/// When disabled, each record is written as soon as it's created.
pub fn set_buffering_enabled(buffering_enabled: bool) {
    VNET_LOGGER.set_buffering_enabled(buffering_enabled);
}

/// A logger that writes to stderr and timestamps each record with the time since the logger was
/// created. Records are queued and written in batches while buffering is enabled.
pub struct VnetLogger {
    start: Instant,
    records: Mutex<Vec<VnetLogRecord>>,
    buffering_enabled: RwLock<bool>,
    max_log_level: OnceCell<LevelFilter>,
}

impl VnetLogger {
    fn new() -> VnetLogger {
        VnetLogger {
            start: Instant::now(),
            records: Mutex::new(Vec::new()),
            buffering_enabled: RwLock::new(false),
            max_log_level: OnceCell::new(),
        }
    }

    /// If the maximum log level has not yet been set, returns `LevelFilter::Trace`.
    pub fn max_level(&self) -> LevelFilter {
        self.max_log_level
            .get()
            .copied()
            .unwrap_or(LevelFilter::Trace)
    }

    /// Is only intended to be called from `init()`. Will panic if called more than once.
    fn set_max_level(&self, level: LevelFilter) {
        self.max_log_level.set(level).unwrap()
    }

    fn set_buffering_enabled(&self, buffering_enabled: bool) {
        let mut writer = self.buffering_enabled.write().unwrap();
        *writer = buffering_enabled;
    }

    fn flush_records(&self) -> std::io::Result<()> {
        // take the queued records so that the lock isn't held while writing
        let records = match self.records.lock() {
            Ok(mut x) => std::mem::take(&mut *x),
            // a thread panicked while holding the lock; flush what it left behind
            Err(e) => std::mem::take(&mut *e.into_inner()),
        };

        let stderr = std::io::stderr();
        let mut stderr = std::io::BufWriter::new(stderr.lock());
        for record in records {
            write!(stderr, "{record}")?;
        }
        stderr.flush()
    }
}

impl Log for VnetLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let vnet_record = VnetLogRecord {
            level: record.level(),
            file: record.file_static(),
            module_path: record.module_path_static(),
            line: record.line(),
            message: std::fmt::format(*record.args()),
            wall_time: self.start.elapsed(),
        };

        let queued = {
            let mut records = self.records.lock().unwrap();
            records.push(vnet_record);
            records.len()
        };

        if record.level() == Level::Error
            || queued >= FLUSH_QD_LINES_THRESHOLD
            || !*self.buffering_enabled.read().unwrap()
        {
            // nowhere left to report a failure to write to stderr
            self.flush_records().ok();
        }
    }

    fn flush(&self) {
        self.flush_records().ok();
    }
}

struct VnetLogRecord {
    level: Level,
    file: Option<&'static str>,
    module_path: Option<&'static str>,
    line: Option<u32>,
    message: String,
    wall_time: Duration,
}

impl std::fmt::Display for VnetLogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        {
            let secs = self.wall_time.as_secs();
            write!(
                f,
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60,
                self.wall_time.subsec_micros(),
            )?;
        }
        write!(f, " [{level}]", level = self.level)?;
        write!(
            f,
            " [{file}:",
            file = self
                .file
                .map(|f| if let Some(sep_pos) = f.rfind('/') {
                    &f[(sep_pos + 1)..]
                } else {
                    f
                })
                .unwrap_or("n/a"),
        )?;
        if let Some(line) = self.line {
            write!(f, "{line}")?;
        } else {
            write!(f, "n/a")?;
        }
        writeln!(
            f,
            "] [{module}] {msg}",
            module = self.module_path.unwrap_or("n/a"),
            msg = self.message
        )?;
        Ok(())
    }
}
