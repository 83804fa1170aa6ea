use crate::qemu_fmt::QemuSink;
use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing one line per record to QEMU's debug console.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    /// A logger that drops records above `max_level`.
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Register as the global logger and set the facade's level filter.
    ///
    /// # Errors
    /// Fails if a logger was installed before.
    pub fn install(&'static self, level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(level.min(self.max_level));
        Ok(())
    }
}

/// Format a record as `"[LEVEL] target: message\n"` into `sink`.
///
/// # Errors
/// Whatever the sink reports.
pub fn write_record<W: Write>(
    sink: &mut W,
    level: Level,
    target: &str,
    args: &fmt::Arguments<'_>,
) -> fmt::Result {
    writeln!(sink, "[{level}] {target}: {args}")
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Best effort; there is nowhere to report a failing debug port.
        let _ = write_record(&mut QemuSink, record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}
