//! Small, closed error enums for the supervision kernel.
//!
//! No `anyhow`/`thiserror` — every failure here is one of a known handful of
//! modes, so a flat enum with a manual `Display` is clearer than an
//! open-ended boxed error chain.

use std::fmt;

/// Failure during startup / configuration validation. Collected and logged
/// before the event loop starts; any `SupervisorError` aborts startup.
#[derive(Debug)]
pub enum SupervisorError {
    Config(String),
    Io(String),
    Pidfile(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Pidfile(e) => write!(f, "pid file error: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

/// Failure to start a child process. Folded into `ProcessFsm::spawnerr` as a
/// human-readable string; never unwinds past `ProcessFsm::spawn`.
#[derive(Debug, Clone)]
pub enum SpawnError {
    /// `fork`/`exec` (via `Command::spawn`) itself failed — e.g. ENOENT, EACCES.
    Exec(String),
    /// The child exited before `startsecs` elapsed.
    EarlyExit { code: Option<i32>, signal: Option<i32> },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec(e) => write!(f, "spawn error: {e}"),
            Self::EarlyExit { code: Some(c), .. } => {
                write!(f, "exited too quickly (exit status {c})")
            }
            Self::EarlyExit { signal: Some(s), .. } => {
                write!(f, "exited too quickly (terminated by signal {s})")
            }
            Self::EarlyExit { .. } => write!(f, "exited too quickly"),
        }
    }
}
