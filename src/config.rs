//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `WARDEND_PIDFILE`, `WARDEND_CONTROL_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `wardend.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [supervisor]
//! pidfile = "/var/run/wardend.pid"
//! nodaemon = true
//!
//! [supervisor.log]
//! file = "/var/log/wardend.log"
//! level = "info"
//! maxbytes = 52428800
//! backups = 10
//!
//! [control]
//! listen = "127.0.0.1:9001"
//!
//! [[group]]
//! name = "web"
//! priority = 1
//!
//! [[group.program]]
//! name = "sleeper"
//! command = ["sleep", "60"]
//! autostart = true
//! autorestart = "always"
//! startsecs = 1
//! startretries = 3
//! stopsignal = "TERM"
//! stopwaitsecs = 10
//! exitcodes = [0]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::logger::Level;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub control: ControlConfig,
    /// Process groups, in declaration order (also the default priority
    /// tie-break order, matching the source's list-order fallback).
    #[serde(rename = "group", default)]
    pub groups: Vec<ProcessGroupConfig>,
}

/// Supervisor-wide settings: daemonization, pid file, own logfile.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_pidfile")]
    pub pidfile: String,
    /// Run in the foreground instead of daemonizing (default true — daemonizing
    /// is an opt-in for production use, matching `-n/--nodaemon`'s intent
    /// inverted for safety during development).
    #[serde(default = "default_nodaemon")]
    pub nodaemon: bool,
    /// Directory for `AUTO`-assigned child log files.
    #[serde(default = "default_childlogdir")]
    pub childlogdir: String,
    #[serde(default)]
    pub log: LogConfig,
}

/// The supervisor's own leveled log, not its children's.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Path to the supervisor's own log file. `None` logs to stdout only.
    pub file: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub maxbytes: u64,
    #[serde(default)]
    pub backups: u32,
}

/// The embedded HTTP control server.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,
    #[serde(default = "default_control_listen")]
    pub listen: String,
}

/// A named collection of sibling programs sharing start/stop ordering.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessGroupConfig {
    pub name: String,
    /// Lower runs/starts first, stops last. Defaults to declaration order.
    #[serde(default)]
    pub priority: i32,
    #[serde(rename = "program")]
    pub programs: Vec<ProcessConfig>,
}

/// Restart policy for a single program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutorestartPolicy {
    Never,
    OnFailure,
    Always,
}

impl Default for AutorestartPolicy {
    fn default() -> Self {
        Self::OnFailure
    }
}

/// Immutable description of one supervised child, fixed at config load.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    /// argv — `command[0]` is the executable, the rest are its arguments.
    pub command: Vec<String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Run as this user (name or numeric uid). `None` keeps the supervisor's uid.
    pub uid: Option<String>,
    pub umask: Option<u32>,

    pub stdout_logfile: Option<String>,
    #[serde(default)]
    pub stdout_logfile_maxbytes: u64,
    #[serde(default)]
    pub stdout_logfile_backups: u32,
    pub stderr_logfile: Option<String>,
    #[serde(default)]
    pub stderr_logfile_maxbytes: u64,
    #[serde(default)]
    pub stderr_logfile_backups: u32,
    /// Bytes of tail ring retained per stream for operator inspection via the
    /// control surface's `/tail` endpoint. 0 disables the ring.
    #[serde(default)]
    pub tail_bytes: usize,

    #[serde(default = "default_autostart")]
    pub autostart: bool,
    #[serde(default)]
    pub autorestart: AutorestartPolicy,
    #[serde(default = "default_startsecs")]
    pub startsecs: u64,
    #[serde(default = "default_startretries")]
    pub startretries: u32,
    #[serde(default = "default_stopsignal")]
    pub stopsignal: String,
    #[serde(default = "default_stopwaitsecs")]
    pub stopwaitsecs: u64,
    #[serde(default = "default_exitcodes")]
    pub exitcodes: Vec<i32>,
}

impl ProcessConfig {
    /// Resolve `stopsignal` (a name like `"TERM"`) to its `libc` signal number.
    /// Unrecognized names fall back to `SIGTERM`.
    pub fn stopsignal_number(&self) -> i32 {
        signal_number(&self.stopsignal).unwrap_or(libc::SIGTERM)
    }
}

/// Parse a signal name (`"TERM"`, `"SIGTERM"`, case-insensitive) into its number.
pub fn signal_number(name: &str) -> Option<i32> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    match bare {
        "HUP" => Some(libc::SIGHUP),
        "INT" => Some(libc::SIGINT),
        "QUIT" => Some(libc::SIGQUIT),
        "ILL" => Some(libc::SIGILL),
        "TRAP" => Some(libc::SIGTRAP),
        "ABRT" => Some(libc::SIGABRT),
        "KILL" => Some(libc::SIGKILL),
        "USR1" => Some(libc::SIGUSR1),
        "SEGV" => Some(libc::SIGSEGV),
        "USR2" => Some(libc::SIGUSR2),
        "PIPE" => Some(libc::SIGPIPE),
        "ALRM" => Some(libc::SIGALRM),
        "TERM" => Some(libc::SIGTERM),
        "CHLD" => Some(libc::SIGCHLD),
        "CONT" => Some(libc::SIGCONT),
        "STOP" => Some(libc::SIGSTOP),
        "TSTP" => Some(libc::SIGTSTP),
        _ => None,
    }
}

fn default_pidfile() -> String {
    "/var/run/wardend.pid".to_string()
}
fn default_nodaemon() -> bool {
    true
}
fn default_childlogdir() -> String {
    "/tmp/wardend".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_control_enabled() -> bool {
    true
}
fn default_control_listen() -> String {
    "127.0.0.1:9001".to_string()
}
fn default_working_dir() -> String {
    "/".to_string()
}
fn default_autostart() -> bool {
    true
}
fn default_startsecs() -> u64 {
    1
}
fn default_startretries() -> u32 {
    3
}
fn default_stopsignal() -> String {
    "TERM".to_string()
}
fn default_stopwaitsecs() -> u64 {
    10
}
fn default_exitcodes() -> Vec<i32> {
    vec![0]
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            pidfile: default_pidfile(),
            nodaemon: default_nodaemon(),
            childlogdir: default_childlogdir(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
            maxbytes: 0,
            backups: 0,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            listen: default_control_listen(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure — an explicitly
    /// named config file that can't be read is a startup bug, not a runtime
    /// condition to recover from). Otherwise looks for `wardend.toml` in the
    /// current directory, falling back to compiled defaults (an empty group
    /// list — a supervisor with nothing to supervise is valid, if useless).
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("wardend.toml").exists() {
            let content =
                std::fs::read_to_string("wardend.toml").expect("Failed to read wardend.toml");
            toml::from_str(&content).expect("Failed to parse wardend.toml")
        } else {
            Config {
                supervisor: SupervisorConfig::default(),
                control: ControlConfig::default(),
                groups: Vec::new(),
            }
        };

        if let Ok(pidfile) = std::env::var("WARDEND_PIDFILE") {
            config.supervisor.pidfile = pidfile;
        }
        if let Ok(listen) = std::env::var("WARDEND_CONTROL_LISTEN") {
            config.control.listen = listen;
        }

        config
    }

    /// Validate cross-field constraints the type system can't express.
    /// Returns human-readable messages; an empty vec means the config is
    /// usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen_names = std::collections::HashSet::new();

        for group in &self.groups {
            if group.programs.is_empty() {
                errors.push(format!("group '{}' has no programs", group.name));
            }
            for program in &group.programs {
                if program.command.is_empty() {
                    errors.push(format!(
                        "program '{}' in group '{}' has an empty command",
                        program.name, group.name
                    ));
                }
                if !seen_names.insert((group.name.clone(), program.name.clone())) {
                    errors.push(format!(
                        "duplicate program name '{}' in group '{}'",
                        program.name, group.name
                    ));
                }
                if signal_number(&program.stopsignal).is_none() {
                    errors.push(format!(
                        "program '{}': unrecognized stopsignal '{}'",
                        program.name, program.stopsignal
                    ));
                }
            }
        }

        errors
    }

    /// Parse `supervisor.log.level` into a [`Level`], defaulting to `INFO` on
    /// an unrecognized name (logged by the caller, not here — this module has
    /// no logger to log through yet during its own construction).
    pub fn log_level(&self) -> Level {
        Level::parse(&self.supervisor.log.level).unwrap_or(Level::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_empty_but_valid_config() {
        let config = Config {
            supervisor: SupervisorConfig::default(),
            control: ControlConfig::default(),
            groups: Vec::new(),
        };
        assert!(config.validate().is_empty());
        assert_eq!(config.supervisor.pidfile, "/var/run/wardend.pid");
    }

    #[test]
    fn validate_catches_empty_command_and_duplicate_names() {
        let program = ProcessConfig {
            name: "a".to_string(),
            command: Vec::new(),
            working_dir: default_working_dir(),
            env: HashMap::new(),
            uid: None,
            umask: None,
            stdout_logfile: None,
            stdout_logfile_maxbytes: 0,
            stdout_logfile_backups: 0,
            stderr_logfile: None,
            stderr_logfile_maxbytes: 0,
            stderr_logfile_backups: 0,
            tail_bytes: 0,
            autostart: true,
            autorestart: AutorestartPolicy::Always,
            startsecs: 1,
            startretries: 3,
            stopsignal: "TERM".to_string(),
            stopwaitsecs: 10,
            exitcodes: vec![0],
        };
        let group = ProcessGroupConfig {
            name: "g".to_string(),
            priority: 0,
            programs: vec![program.clone(), program],
        };
        let config = Config {
            supervisor: SupervisorConfig::default(),
            control: ControlConfig::default(),
            groups: vec![group],
        };
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("empty command")));
        assert!(errors.iter().any(|e| e.contains("duplicate program name")));
    }

    #[test]
    fn signal_number_accepts_bare_and_sig_prefixed_names() {
        assert_eq!(signal_number("TERM"), Some(libc::SIGTERM));
        assert_eq!(signal_number("SIGTERM"), Some(libc::SIGTERM));
        assert_eq!(signal_number("term"), Some(libc::SIGTERM));
        assert_eq!(signal_number("bogus"), None);
    }
}
