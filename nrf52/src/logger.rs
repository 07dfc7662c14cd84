//! `log` backend that prints over semihosting
//!
//! Records look like `I (1234) RX_TASK: Waiting for data...`: level, milliseconds since boot,
//! target, message

use cortex_m_semihosting::hprintln;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::timer;

struct Semihosting;

static LOGGER: Semihosting = Semihosting;

/// Installs the logger; records below `level` are discarded
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

impl Log for Semihosting {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let letter = match record.level() {
            Level::Error => 'E',
            Level::Warn => 'W',
            Level::Info => 'I',
            Level::Debug => 'D',
            Level::Trace => 'V',
        };

        // NOTE a debugger may not be attached; dropping the record is fine
        hprintln!(
            "{} ({}) {}: {}",
            letter,
            timer::now().as_millis(),
            record.target(),
            record.args()
        )
        .ok();
    }

    fn flush(&self) {}
}
