//! Logging for the hostlink host process.
//!
//! Installs one global `fern` dispatcher with two sinks: colored stdout and a
//! plain-text `hostlink.log` in the log directory. Each line carries the thread
//! name, since the network, sender and host-loop threads all log through it.

use crate::error::HostlinkError;

use common::ErrorLocation;

use std::fmt::{Arguments, Display};
use std::fs::create_dir_all;
use std::io::stdout;
use std::panic::Location;
use std::path::Path;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::SystemTime;

use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use fern::{Dispatch, FormatCallback};
use humantime::format_rfc3339;
use log::{LevelFilter, Record, info, warn};

/// Thread-safe initialization guard.
static INIT_LOGGER_ONCE: Once = Once::new();

/// Tracks if logger initialization was already attempted.
static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

/// Log file name.
pub const LOG_FILE_NAME: &str = "hostlink.log";

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Initialize the logger with dual output (stdout + `log_dir/hostlink.log`).
///
/// Creates `log_dir` if needed. Safe to call more than once: later calls log a
/// warning and return `Ok`.
///
/// # Errors
///
/// Returns [`HostlinkError::Hostlink`] if the directory or log file cannot be
/// created, or another global logger is already installed.
pub fn initialize(log_dir: &Path) -> Result<(), HostlinkError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("Logger already initialized");
        return Ok(());
    }

    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(log_dir);
        if result.is_ok() {
            info!(
                "Logger initialized with level {LOG_LEVEL:?}, file {}",
                log_dir.join(LOG_FILE_NAME).display()
            );
        }
    });

    result
}

#[track_caller]
fn initialize_internal(log_dir: &Path) -> Result<(), HostlinkError> {
    create_dir_all(log_dir).map_err(|e| HostlinkError::Hostlink {
        message: format!("Failed to create log directory {}: {e}", log_dir.display()),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let log_file = fern::log_file(log_dir.join(LOG_FILE_NAME)).map_err(|e| {
        HostlinkError::Hostlink {
            message: format!("Failed to create log file: {e}"),
            location: ErrorLocation::from(Location::caller()),
        }
    })?;

    let colors = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    let stdout_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            write_line(out, colors.color(record.level()), message, record)
        })
        .chain(stdout());

    let file_dispatch = Dispatch::new()
        .format(|out, message, record| write_line(out, record.level(), message, record))
        .chain(log_file);

    Dispatch::new()
        .level(LOG_LEVEL)
        .chain(stdout_dispatch)
        .chain(file_dispatch)
        .apply()
        .map_err(|e| HostlinkError::Hostlink {
            message: format!("Failed to initialize logger: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
}

/// `[<rfc3339> - <LEVEL> - <thread>] <message> [<file>:<line>]`
fn write_line(out: FormatCallback<'_>, level: impl Display, message: &Arguments, record: &Record) {
    let current = thread::current();
    out.finish(format_args!(
        "[{date} - {level} - {thread}] {message} [{file}:{line}]",
        date = format_rfc3339(SystemTime::now()),
        thread = current.name().unwrap_or("unnamed"),
        file = record.file().unwrap_or("unknown"),
        line = record.line().unwrap_or(0),
    ))
}
