//! Leveled logging for the supervisor's own diagnostics, independent of each
//! child's captured stdout/stderr (see [`crate::capture`] for those).
//!
//! Levels follow the source's numbering (`CRIT=50`..`TRACE=5`) rather than
//! `tracing`'s, because operator-facing config (`supervisor.log.level`) and
//! the control surface's `/status` output both expose this scale directly.
//! Ambient crate-internal diagnostics (task panics, axum request traces)
//! still go through `tracing`/`tracing-subscriber`; this module is only the
//! supervisor's own structured log record.

mod sink;

pub use sink::{FileSink, RingSink, Sink, StreamSink};

use std::fmt;

use crate::clock::now_secs;

/// Log levels, ordered least to most severe by numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 5,
    Debug = 10,
    Info = 20,
    Warn = 30,
    Error = 40,
    Crit = 50,
}

impl Level {
    /// Parse a config-file level name, case-insensitively. `"warning"` is
    /// accepted as an alias for `"warn"`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "crit" | "critical" => Some(Self::Crit),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Crit => "CRIT",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One formatted line: `"<epoch> <LEVEL> <message>"`, matching the source's
/// `"%(asctime)s %(levelname)s %(message)s"` layout with epoch seconds
/// standing in for a formatted timestamp (kept machine-sortable and
/// allocation-free to build).
pub struct LogRecord {
    pub when: u64,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.when, self.level, self.message)
    }
}

/// The supervisor's own logger: a level filter in front of zero or more
/// sinks. Every sink receives every record that passes the filter — there's
/// no per-sink level in this implementation, unlike the source's handler
/// list (an open question resolved in favor of the simpler single-filter
/// design, since `supervisor.log.level` is the only level knob exposed).
pub struct Logger {
    level: Level,
    sinks: Vec<Box<dyn Sink>>,
}

impl Logger {
    pub fn new(level: Level) -> Self {
        Self { level, sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        if level < self.level {
            return;
        }
        let record = LogRecord { when: now_secs(), level, message: message.into() };
        let line = record.to_string();
        for sink in &mut self.sinks {
            sink.write_line(&line);
        }
    }

    pub fn crit(&mut self, message: impl Into<String>) {
        self.log(Level::Crit, message);
    }
    pub fn error(&mut self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }
    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }
    pub fn info(&mut self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }
    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    /// SIGUSR2: reopen every sink at its current destination. A sink write
    /// error here never propagates — it's reported to stderr (the
    /// fallback error stream) and the remaining sinks still get a chance.
    pub fn reopen_all(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.reopen() {
                eprintln!("wardend: log reopen failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_source_numbering() {
        assert!(Level::Crit > Level::Error);
        assert!(Level::Error > Level::Warn);
        assert!(Level::Warn > Level::Info);
        assert!(Level::Info > Level::Debug);
        assert!(Level::Debug > Level::Trace);
    }

    #[test]
    fn parse_accepts_warning_alias() {
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("nonsense"), None);
    }

    #[test]
    fn filter_drops_records_below_level() {
        let sink = RingSink::new(4096);
        let handle = sink.clone();
        let mut logger = Logger::new(Level::Warn).with_sink(Box::new(sink));
        logger.info("should be dropped");
        logger.error("should appear");
        let tail = handle.tail();
        let text = String::from_utf8_lossy(&tail);
        assert!(!text.contains("should be dropped"));
        assert!(text.contains("should appear"));
    }
}
