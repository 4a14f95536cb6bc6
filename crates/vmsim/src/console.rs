//! Defines the console logger that writes log records to standard error.

use std::io::Write as _;

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    line: Mutex<String>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger. Each `-v` raises the level by one step
    /// from `warn`.
    pub fn init(verbosity: u8) -> Result<&'static Self, log::SetLoggerError> {
        let console = Self::default();
        console.install(verbosity)?;
        Ok(console)
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(|| Console {
            line: Mutex::new(String::new()),
        })
    }

    pub fn install(&'static self, verbosity: u8) -> Result<(), log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(level_for(verbosity));
        Ok(())
    }
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = self.line.lock();
        line.clear();
        if write_log_entry_to(&mut *line, record).is_ok() {
            // Nothing sensible to do if stderr is gone.
            let _ = std::io::stderr().write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn write_log_entry_to(
    writer: &mut impl std::fmt::Write,
    record: &log::Record,
) -> std::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(level_for(0), LevelFilter::Warn);
        assert_eq!(level_for(1), LevelFilter::Info);
        assert_eq!(level_for(2), LevelFilter::Debug);
        assert_eq!(level_for(9), LevelFilter::Trace);
    }

    #[test]
    fn formats_entries() {
        let mut line = String::new();
        write_log_entry_to(
            &mut line,
            &log::Record::builder()
                .level(log::Level::Info)
                .target("vmm")
                .args(format_args!("page fault at {:#x}", 0x80))
                .build(),
        )
        .unwrap();
        assert!(line.contains("INFO"));
        assert!(line.ends_with("page fault at 0x80\n"));
    }
}
