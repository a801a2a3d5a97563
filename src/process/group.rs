//! A named collection of sibling processes sharing start/stop ordering.
//!
//! Matches the source's `ProcessGroup`: processes within a group start in
//! declaration order and stop in the reverse of it. `priority` lives on the
//! group itself, not on individual processes here (unlike the source, where
//! each program config carries its own priority too) — it governs ordering
//! *between* groups, which [`crate::event_loop::EventLoop`] fans out over in
//! ascending-priority order for start and descending for stop.

use tokio::sync::mpsc;

use crate::config::ProcessGroupConfig;
use crate::event_loop::LoopEvent;
use crate::process::fsm::ProcessFsm;
use crate::process::ProcessState;

pub struct ProcessGroup {
    pub name: String,
    pub priority: i32,
    /// Processes in configured (== start) order; `stop_all` walks it in
    /// reverse rather than re-sorting, since declaration order already
    /// encodes the intended priority for same-priority ties.
    pub processes: Vec<ProcessFsm>,
}

impl ProcessGroup {
    pub fn from_config(config: ProcessGroupConfig, events: mpsc::Sender<LoopEvent>) -> Self {
        Self {
            name: config.name,
            priority: config.priority,
            processes: config
                .programs
                .into_iter()
                .map(|program| ProcessFsm::new(program, events.clone()))
                .collect(),
        }
    }

    /// Spawn every `autostart`-eligible STOPPED process. Called once at
    /// startup and again after a SIGHUP reload for any newly-added
    /// processes (existing live ones are adopted, not respawned).
    pub fn start_necessary(&mut self) {
        for process in &mut self.processes {
            if process.config.autostart && process.state == ProcessState::Stopped {
                process.spawn();
            }
        }
    }

    /// Signal every process that isn't already stopped, in reverse
    /// declaration order (source: `ProcessGroup.stop_all` iterates
    /// processes sorted by priority descending).
    pub fn stop_all(&mut self) {
        for process in self.processes.iter_mut().rev() {
            if process.state.is_running() || process.state == ProcessState::Backoff {
                process.stop();
            }
        }
    }

    /// True once every process has left a "busy" state (RUNNING/STARTING/
    /// STOPPING/BACKOFF), i.e. shutdown can proceed to the next group or
    /// complete entirely.
    pub fn all_stopped(&self) -> bool {
        self.processes.iter().all(|p| {
            !matches!(
                p.state,
                ProcessState::Starting
                    | ProcessState::Running
                    | ProcessState::Stopping
                    | ProcessState::Backoff
            )
        })
    }

    /// Drive every process's time-based transitions for this tick:
    /// STARTING -> RUNNING, BACKOFF -> STARTING/FATAL, STOPPING -> SIGKILL.
    pub fn transition(&mut self) {
        for process in &mut self.processes {
            process.maybe_promote_to_running();
            process.maybe_retry();
            process.maybe_escalate_kill();
        }
    }

    /// SIGUSR2: reopen every live process's capture file sinks in this group.
    pub fn reopen_logs(&self) {
        for process in &self.processes {
            process.reopen_logs();
        }
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ProcessFsm> {
        self.processes.iter_mut().find(|p| p.name() == name)
    }

    pub fn find(&self, name: &str) -> Option<&ProcessFsm> {
        self.processes.iter().find(|p| p.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutorestartPolicy, ProcessConfig};
    use std::collections::HashMap;

    fn program(name: &str) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            command: vec!["/bin/true".to_string()],
            working_dir: "/".to_string(),
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
            autostart: false,
            autorestart: AutorestartPolicy::Never,
            startsecs: 1,
            startretries: 3,
            stopsignal: "TERM".to_string(),
            stopwaitsecs: 10,
            exitcodes: vec![0],
        }
    }

    #[test]
    fn all_stopped_true_when_every_process_is_idle() {
        let (tx, _rx) = mpsc::channel(1);
        let group = ProcessGroup::from_config(
            ProcessGroupConfig {
                name: "g".to_string(),
                priority: 0,
                programs: vec![program("a"), program("b")],
            },
            tx,
        );
        assert!(group.all_stopped());
    }

    #[test]
    fn find_mut_locates_by_name() {
        let (tx, _rx) = mpsc::channel(1);
        let mut group = ProcessGroup::from_config(
            ProcessGroupConfig {
                name: "g".to_string(),
                priority: 0,
                programs: vec![program("a"), program("b")],
            },
            tx,
        );
        assert!(group.find_mut("b").is_some());
        assert!(group.find_mut("missing").is_none());
    }
}
