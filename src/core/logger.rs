//! Logging facilities to record controller decisions during simulation.

use std::fs::File;

use atty::Stream;
use colored::{Color, ColoredString, Colorize};
use log::Level;
use serde::Serialize;

use crate::core::common::Time;

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

pub trait Logger {
    fn log_error(&mut self, time: Time, scope: &str, log: String);

    fn log_warn(&mut self, time: Time, scope: &str, log: String);

    fn log_info(&mut self, time: Time, scope: &str, log: String);

    fn log_debug(&mut self, time: Time, scope: &str, log: String);

    fn log_trace(&mut self, time: Time, scope: &str, log: String);

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error>;
}

/// Forwards controller logs to the `log` crate with colored level tags.
#[derive(Default)]
pub struct StdoutLogger {}

impl StdoutLogger {
    pub fn new() -> Self {
        Self {}
    }
}

fn seconds(time: Time) -> f64 {
    time as f64 / 1e6
}

impl Logger for StdoutLogger {
    fn log_error(&mut self, time: Time, scope: &str, log: String) {
        log::error!(
            target: scope,
            "[{:.3} {} {}] {}",
            seconds(time),
            get_colored("ERROR", Color::Red),
            scope,
            log
        );
    }

    fn log_warn(&mut self, time: Time, scope: &str, log: String) {
        log::warn!(
            target: scope,
            "[{:.3} {}  {}] {}",
            seconds(time),
            get_colored("WARN", Color::Yellow),
            scope,
            log
        );
    }

    fn log_info(&mut self, time: Time, scope: &str, log: String) {
        log::info!(
            target: scope,
            "[{:.3} {}  {}] {}",
            seconds(time),
            get_colored("INFO", Color::Green),
            scope,
            log
        );
    }

    fn log_debug(&mut self, time: Time, scope: &str, log: String) {
        log::debug!(
            target: scope,
            "[{:.3} {} {}] {}",
            seconds(time),
            get_colored("DEBUG", Color::Blue),
            scope,
            log
        );
    }

    fn log_trace(&mut self, time: Time, scope: &str, log: String) {
        log::trace!(
            target: scope,
            "[{:.3} {} {}] {}",
            seconds(time),
            get_colored("TRACE", Color::Cyan),
            scope,
            log
        );
    }

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error> {
        Ok(())
    }
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: Time,
    scope: String,
    message: String,
}

/// Collects log entries in memory and exports them as CSV.
pub struct FileLogger {
    log: Vec<LogEntry>,
    level: Level,
}

impl Default for FileLogger {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            level: Level::Info,
        }
    }
}

impl FileLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self { log: Vec::new(), level }
    }

    fn log_internal(&mut self, time: Time, scope: &str, message: String, level: Level) {
        if self.level < level {
            return;
        }
        self.log.push(LogEntry {
            timestamp: time,
            scope: scope.to_string(),
            message,
        });
    }
}

impl Logger for FileLogger {
    fn log_error(&mut self, time: Time, scope: &str, log: String) {
        self.log_internal(time, scope, log, Level::Error)
    }

    fn log_warn(&mut self, time: Time, scope: &str, log: String) {
        self.log_internal(time, scope, log, Level::Warn)
    }

    fn log_info(&mut self, time: Time, scope: &str, log: String) {
        self.log_internal(time, scope, log, Level::Info)
    }

    fn log_debug(&mut self, time: Time, scope: &str, log: String) {
        self.log_internal(time, scope, log, Level::Debug)
    }

    fn log_trace(&mut self, time: Time, scope: &str, log: String) {
        self.log_internal(time, scope, log, Level::Trace)
    }

    fn save_log(&self, path: &str) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        for entry in &self.log {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
