//! Process-wide log routing.
//!
//! The crate logs through the `log` facade. On Android the JNI layer installs
//! `android_logger`; other hosts can route records into their own logging by
//! installing a [`LogSink`] once at startup.

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Destination for formatted log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, level: Level, target: &str, message: &str);
}

struct SinkLogger {
    sink: Box<dyn LogSink>,
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.sink.write(record.level(), record.target(), &record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Installs `sink` as the global logger.
///
/// # Errors
///
/// Fails if a logger has already been installed for this process.
pub fn install(sink: Box<dyn LogSink>, max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(SinkLogger { sink }))?;
    log::set_max_level(max_level);
    Ok(())
}
