//! Per-process state machine: the core of the supervision kernel.
//!
//! States and transitions follow the source's `ProcessStates` bitmask and
//! `Subprocess.transition()` exactly. Spawning sets `setpgid(0, 0)` via
//! `pre_exec` so `kill()` can signal the whole process group rather than
//! just the direct child, matching the source's `os.killpg` calls.
//!
//! Reaping happens via a dedicated `child.wait().await` task per spawn,
//! not a manual `waitpid` poll — a child spawned through
//! `tokio::process::Command` is already tracked by tokio's own SIGCHLD
//! driver, so a second, independent `waitpid(-1)` loop would race it for
//! the exit status. One task per child avoids that race and keeps the
//! event loop itself free of blocking syscalls.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::{mpsc, Notify};

use crate::capture::{OutputCapture, Stream};
use crate::clock::now_secs;
use crate::config::ProcessConfig;
use crate::error::SpawnError;
use crate::event_loop::LoopEvent;

/// Mirrors the source's `ProcessStates` enum exactly (name and meaning).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Backoff => "BACKOFF",
            Self::Stopping => "STOPPING",
            Self::Exited => "EXITED",
            Self::Fatal => "FATAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// States in which the process is considered "up" for the purpose of
    /// group start/stop ordering (`RUNNING_STATES` in the source).
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// One supervised child process and everything needed to restart it.
pub struct ProcessFsm {
    pub config: ProcessConfig,
    pub state: ProcessState,
    /// Set by an explicit `stop` control op; suppresses autorestart and
    /// distinguishes an operator-requested stop from a crash (source's
    /// `administrative_stop` flag).
    pub administrative_stop: bool,
    /// Consecutive failed start attempts since the last clean RUNNING.
    pub backoff: u32,
    /// Epoch-seconds deadline: STARTING waits until past `laststart +
    /// startsecs`, BACKOFF waits until past `delay` before retrying,
    /// STOPPING waits until past `delay` before escalating to SIGKILL.
    pub delay: u64,
    pub laststart: u64,
    /// Epoch seconds of the last time this FSM left a "has a pid" state,
    /// whatever the cause (clean exit, crash, or administrative stop).
    pub laststop: u64,
    pub pid: Option<u32>,
    pub exit_status: Option<ExitRecord>,
    pub spawnerr: Option<String>,
    stdout_capture: Option<OutputCapture>,
    stderr_capture: Option<OutputCapture>,
    output_notify: Arc<Notify>,
    events: mpsc::Sender<LoopEvent>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub expected: bool,
}

impl ProcessFsm {
    pub fn new(config: ProcessConfig, events: mpsc::Sender<LoopEvent>) -> Self {
        Self {
            config,
            state: ProcessState::Stopped,
            administrative_stop: false,
            backoff: 0,
            delay: 0,
            laststart: 0,
            laststop: 0,
            pid: None,
            exit_status: None,
            spawnerr: None,
            stdout_capture: None,
            stderr_capture: None,
            output_notify: Arc::new(Notify::new()),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Linear backoff delay in seconds for retry attempt `backoff`, capped
    /// at the source's implicit ceiling by `startretries` itself (the
    /// process goes FATAL before the delay would grow unreasonably).
    fn backoff_delay(&self) -> u64 {
        u64::from(self.backoff).min(60)
    }

    /// Fork+exec the configured command, entering STARTING. Matches the
    /// source's `Subprocess.spawn()`: records `laststart`, clears
    /// `spawnerr`/`exit_status`, and sets up output capture immediately so
    /// no early output is lost.
    ///
    /// No-op while a pid is already held (RUNNING/STARTING/STOPPING) — a
    /// second spawn on top of a live child would leak its pipes and orphan
    /// the first process.
    pub fn spawn(&mut self) {
        if self.state.is_running() {
            return;
        }

        self.laststart = now_secs();
        self.spawnerr = None;
        self.exit_status = None;

        let Some(program) = self.config.command.first().cloned() else {
            self.spawnerr = Some("empty command".to_string());
            self.enter_backoff();
            return;
        };
        let args = &self.config.command[1..];

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd.envs(&self.config.env);
        if let Some(umask) = self.config.umask {
            unsafe {
                cmd.pre_exec(move || {
                    libc::umask(umask as libc::mode_t);
                    Ok(())
                });
            }
        }
        if let Some(uid) = self.config.uid.as_deref().and_then(crate::privilege::resolve_uid) {
            unsafe {
                cmd.pre_exec(move || crate::privilege::drop_to_uid(uid));
            }
        }
        // SAFETY: setpgid is async-signal-safe per POSIX.
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        match cmd.spawn() {
            Ok(mut child) => {
                self.pid = child.id();
                if let Some(stdout) = child.stdout.take() {
                    self.stdout_capture = Some(OutputCapture::spawn(
                        Stream::Stdout,
                        stdout,
                        &self.config,
                        Arc::clone(&self.output_notify),
                    ));
                }
                if let Some(stderr) = child.stderr.take() {
                    self.stderr_capture = Some(OutputCapture::spawn(
                        Stream::Stderr,
                        stderr,
                        &self.config,
                        Arc::clone(&self.output_notify),
                    ));
                }

                let pid = self.pid;
                let events = self.events.clone();
                tokio::spawn(async move {
                    let (code, signal) = match child.wait().await {
                        Ok(status) => (status.code(), status.signal()),
                        Err(_) => (None, None),
                    };
                    if let Some(pid) = pid {
                        let _ = events.send(LoopEvent::Exited { pid: pid as i32, code, signal }).await;
                    }
                });

                self.state = ProcessState::Starting;
            }
            Err(e) => {
                self.spawnerr = Some(SpawnError::Exec(e.to_string()).to_string());
                self.enter_backoff();
            }
        }
    }

    /// STARTING -> RUNNING once `startsecs` has elapsed without the child
    /// exiting. A `startsecs` of 0 promotes immediately on the next tick.
    pub fn maybe_promote_to_running(&mut self) {
        if self.state == ProcessState::Starting
            && now_secs() >= self.laststart + self.config.startsecs
        {
            self.state = ProcessState::Running;
            self.backoff = 0;
        }
    }

    /// BACKOFF -> STARTING once the retry delay has elapsed, unless
    /// `startretries` has been exhausted (-> FATAL).
    pub fn maybe_retry(&mut self) {
        if self.state == ProcessState::Backoff && now_secs() >= self.delay {
            if self.backoff >= self.config.startretries {
                self.state = ProcessState::Fatal;
            } else {
                self.spawn();
            }
        }
    }

    fn enter_backoff(&mut self) {
        self.backoff += 1;
        self.delay = now_secs() + self.backoff_delay();
        self.state = if self.backoff >= self.config.startretries {
            ProcessState::Fatal
        } else {
            ProcessState::Backoff
        };
    }

    /// Send `stopsignal`, enter STOPPING, and record the SIGKILL escalation
    /// deadline (`stopwaitsecs` from now). Sets `administrative_stop` so
    /// the reap handler below doesn't autorestart it.
    pub fn stop(&mut self) {
        self.administrative_stop = true;
        match self.state {
            ProcessState::Starting | ProcessState::Running => {
                self.send_signal(self.config.stopsignal_number());
                self.delay = now_secs() + self.config.stopwaitsecs;
                self.state = ProcessState::Stopping;
            }
            ProcessState::Backoff => {
                self.state = ProcessState::Stopped;
            }
            _ => {}
        }
    }

    /// STOPPING -> escalate to SIGKILL once `stopwaitsecs` has elapsed
    /// without the child exiting.
    pub fn maybe_escalate_kill(&mut self) {
        if self.state == ProcessState::Stopping && now_secs() >= self.delay {
            self.send_signal(libc::SIGKILL);
        }
    }

    /// Signal the process group (not just the direct child), matching the
    /// source's `os.killpg(os.getpgid(pid), sig)`.
    pub fn send_signal(&self, sig: i32) {
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(-(pid as i32), sig);
            }
        }
    }

    /// Clear FATAL and reset backoff so the next `start` op actually spawns.
    /// Only reachable via an explicit operator control op (source: FATAL is
    /// never cleared by autorestart logic, only by `supervisorctl start`).
    pub fn clear_fatal(&mut self) {
        if self.state == ProcessState::Fatal {
            self.backoff = 0;
            self.administrative_stop = false;
            self.state = ProcessState::Stopped;
        }
    }

    /// Record a reaped exit and decide the next state: EXITED (clean or
    /// expected), BACKOFF (unexpected exit during RUNNING with autorestart
    /// eligible), STOPPED (administrative stop completed), or FATAL.
    pub fn finish(&mut self, code: Option<i32>, signal: Option<i32>) {
        let expected = code.is_some_and(|c| self.config.exitcodes.contains(&c));
        self.exit_status = Some(ExitRecord { code, signal, expected });
        self.pid = None;
        self.laststop = now_secs();
        self.stdout_capture.take().map(OutputCapture::close);
        self.stderr_capture.take().map(OutputCapture::close);

        let was_stopping_or_administrative =
            self.state == ProcessState::Stopping || self.administrative_stop;

        if was_stopping_or_administrative {
            self.state = ProcessState::Stopped;
            self.administrative_stop = false;
            return;
        }

        if self.state == ProcessState::Starting {
            self.spawnerr = Some(SpawnError::EarlyExit { code, signal }.to_string());
            self.enter_backoff();
            return;
        }

        // RUNNING -> EXITED, then decide whether autorestart applies. This is
        // a crash after the process was already confirmed up, not a start
        // failure, so it does not touch `backoff`/FATAL — those gate
        // consecutive *start* failures only. A restart-eligible crash just
        // drops back to STOPPED for `start_necessary()` to pick back up.
        let should_restart = match self.config.autorestart {
            crate::config::AutorestartPolicy::Always => true,
            crate::config::AutorestartPolicy::Never => false,
            crate::config::AutorestartPolicy::OnFailure => !expected,
        };

        if should_restart {
            self.state = ProcessState::Stopped;
        } else {
            self.state = ProcessState::Exited;
        }
    }

    /// SIGUSR2: reopen this process's capture file sinks at their
    /// configured paths, if it currently has any open (i.e. it's running).
    pub fn reopen_logs(&self) {
        if let Some(capture) = self.stdout_capture.as_ref() {
            capture.reopen();
        }
        if let Some(capture) = self.stderr_capture.as_ref() {
            capture.reopen();
        }
    }

    pub fn tail_stdout(&self) -> Option<Vec<u8>> {
        self.stdout_capture.as_ref().and_then(OutputCapture::tail_bytes)
    }

    pub fn tail_stderr(&self) -> Option<Vec<u8>> {
        self.stderr_capture.as_ref().and_then(OutputCapture::tail_bytes)
    }

    pub fn output_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.output_notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(name: &str) -> ProcessConfig {
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
            autostart: true,
            autorestart: crate::config::AutorestartPolicy::OnFailure,
            startsecs: 1,
            startretries: 3,
            stopsignal: "TERM".to_string(),
            stopwaitsecs: 10,
            exitcodes: vec![0],
        }
    }

    fn test_fsm(name: &str) -> ProcessFsm {
        let (tx, _rx) = mpsc::channel(1);
        ProcessFsm::new(test_config(name), tx)
    }

    #[test]
    fn unexpected_exit_during_running_drops_to_stopped_without_backoff() {
        let mut fsm = test_fsm("a");
        fsm.state = ProcessState::Running;
        fsm.finish(Some(1), None);
        assert_eq!(fsm.state, ProcessState::Stopped);
        assert_eq!(fsm.backoff, 0);
    }

    #[test]
    fn early_exit_during_starting_enters_backoff_with_spawnerr() {
        let mut fsm = test_fsm("a");
        fsm.state = ProcessState::Starting;
        fsm.finish(Some(1), None);
        assert_eq!(fsm.state, ProcessState::Backoff);
        assert_eq!(fsm.backoff, 1);
        assert!(fsm.spawnerr.is_some());
    }

    #[test]
    fn expected_exit_with_onfailure_policy_goes_exited() {
        let mut fsm = test_fsm("a");
        fsm.state = ProcessState::Running;
        fsm.finish(Some(0), None);
        assert_eq!(fsm.state, ProcessState::Exited);
    }

    #[test]
    fn backoff_exhausted_goes_fatal() {
        let mut fsm = test_fsm("a");
        fsm.backoff = fsm.config.startretries;
        fsm.state = ProcessState::Backoff;
        fsm.delay = 0;
        fsm.maybe_retry();
        assert_eq!(fsm.state, ProcessState::Fatal);
    }

    #[test]
    fn administrative_stop_suppresses_restart() {
        let mut fsm = test_fsm("a");
        fsm.state = ProcessState::Stopping;
        fsm.administrative_stop = true;
        fsm.finish(None, Some(libc::SIGTERM));
        assert_eq!(fsm.state, ProcessState::Stopped);
        assert_eq!(fsm.backoff, 0);
    }

    #[test]
    fn clear_fatal_resets_backoff() {
        let mut fsm = test_fsm("a");
        fsm.state = ProcessState::Fatal;
        fsm.backoff = 3;
        fsm.clear_fatal();
        assert_eq!(fsm.state, ProcessState::Stopped);
        assert_eq!(fsm.backoff, 0);
    }
}
