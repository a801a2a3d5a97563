//! The single-owner loop that replaces the source's `select()`-based
//! `runforever()`. One task, spawned by [`crate::supervisor::run_forever`],
//! owns every [`ProcessGroup`] and is the only code in the process that
//! mutates FSM state — everything else (capture tasks, signal listeners,
//! the control server) only ever sends it events.
//!
//! Tick order mirrors the source's loop body: drain pending events, start
//! anything newly eligible, wait for the next wakeup (a control op, a
//! child exit, or the 1s poll interval — the source's `select()` timeout),
//! drive time-based transitions, then act on any pending signal. Signal
//! handling comes last so a SIGHUP/SIGTERM received mid-tick acts on a
//! fully caught-up state snapshot. Children are reaped by their own
//! exit-watcher task (one per spawn, see [`crate::process::ProcessFsm::spawn`])
//! rather than by a `waitpid(-1)` poll here, since a second reaper racing
//! tokio's own SIGCHLD-driven one could steal the exit status.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::control::{ControlOp, ProcessStatus, TailStream};
use crate::logger::Logger;
use crate::process::ProcessGroup;
use crate::signals::SignalSink;

/// Everything that can wake the event loop outside its 1s poll tick: a
/// control surface request, or a child's exit status reported by its
/// dedicated exit-watcher task (see [`crate::process::ProcessFsm::spawn`]).
/// Routing both through one channel keeps a single `select!` arm as the
/// only place FSM state changes.
pub enum LoopEvent {
    Control(ControlOp),
    Exited { pid: i32, code: Option<i32>, signal: Option<i32> },
}

/// Mirrors the source's `mood`: 1 (running), 0 (restarting via SIGHUP), -1
/// (shutting down via SIGTERM/SIGINT/SIGQUIT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mood {
    Running,
    Restarting,
    ShuttingDown,
}

/// What made the loop stop, and what the caller should do next.
pub enum LoopExit {
    /// SIGTERM/SIGINT/SIGQUIT and every group finished stopping.
    Shutdown,
    /// SIGHUP: the caller should drop this loop's groups and reconstruct,
    /// re-reading configuration, but children already running are left
    /// alone rather than respawned — they're handed back so the new
    /// `Supervisor` can adopt them as already-RUNNING.
    Reload(HashMap<String, ProcessGroup>),
}

pub struct EventLoop {
    groups: HashMap<String, ProcessGroup>,
    event_rx: mpsc::Receiver<LoopEvent>,
    signals: SignalSink,
    mood: Mood,
    logger: Logger,
}

impl EventLoop {
    pub fn new(
        groups: HashMap<String, ProcessGroup>,
        event_rx: mpsc::Receiver<LoopEvent>,
        signals: SignalSink,
        logger: Logger,
    ) -> Self {
        Self { groups, event_rx, mood: Mood::Running, signals, logger }
    }

    /// Runs until shutdown or reload, then hands the event channel's receive
    /// half back to the caller — a SIGHUP reconstructs the groups and the
    /// signal/control wiring, but every already-spawned child's
    /// exit-watcher task still holds a sender for *this* channel, so the
    /// channel itself must survive the reload or their exit reports would
    /// vanish into a dropped receiver.
    pub async fn run(mut self) -> (LoopExit, mpsc::Receiver<LoopEvent>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(1000));

        self.start_necessary_by_priority();

        loop {
            while let Ok(event) = self.event_rx.try_recv() {
                self.handle_event(event);
            }

            tokio::select! {
                _ = ticker.tick() => {}
                maybe_event = self.event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event),
                        None => return (LoopExit::Shutdown, self.event_rx),
                    }
                }
            }

            if self.mood == Mood::Running {
                self.start_necessary_by_priority();
            }
            for group in self.groups.values_mut() {
                group.transition();
            }

            if let Some(sig) = self.signals.take() {
                match sig {
                    libc::SIGTERM | libc::SIGINT | libc::SIGQUIT => {
                        info!(signal = sig, "shutdown requested");
                        self.mood = Mood::ShuttingDown;
                        self.stop_all_by_priority();
                    }
                    libc::SIGHUP => {
                        info!("reload requested");
                        self.mood = Mood::Restarting;
                        return (LoopExit::Reload(self.groups), self.event_rx);
                    }
                    libc::SIGUSR2 => {
                        self.logger.info("reopening logs on SIGUSR2");
                        self.logger.reopen_all();
                        for group in self.groups.values() {
                            group.reopen_logs();
                        }
                    }
                    _ => {}
                }
            }

            if self.mood == Mood::ShuttingDown && self.groups.values().all(ProcessGroup::all_stopped)
            {
                return (LoopExit::Shutdown, self.event_rx);
            }
        }
    }

    /// Group names sorted by ascending `priority`, ties broken by name for a
    /// stable order — a `HashMap`'s own iteration order carries no meaning,
    /// so anything that must fan out in priority order has to go through
    /// this rather than `self.groups.values()` directly.
    fn group_names_by_priority(&self) -> Vec<String> {
        let mut names: Vec<&String> = self.groups.keys().collect();
        names.sort_by_key(|name| (self.groups[*name].priority, name.as_str()));
        names.into_iter().cloned().collect()
    }

    /// Spawn autostart-eligible processes, group by group, in ascending
    /// priority order (source: lower-priority groups start first).
    fn start_necessary_by_priority(&mut self) {
        for name in self.group_names_by_priority() {
            if let Some(group) = self.groups.get_mut(&name) {
                group.start_necessary();
            }
        }
    }

    /// Stop every group's processes, highest-priority group first (source:
    /// `ProcessGroup` shutdown walks groups in descending priority order,
    /// the reverse of startup).
    fn stop_all_by_priority(&mut self) {
        for name in self.group_names_by_priority().into_iter().rev() {
            if let Some(group) = self.groups.get_mut(&name) {
                group.stop_all();
            }
        }
    }

    fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Control(op) => self.handle_op(op),
            LoopEvent::Exited { pid, code, signal } => self.finish_pid(pid, code, signal),
        }
    }

    fn finish_pid(&mut self, pid: i32, code: Option<i32>, signal: Option<i32>) {
        for group in self.groups.values_mut() {
            for process in &mut group.processes {
                if process.pid == Some(pid as u32) {
                    process.finish(code, signal);
                    return;
                }
            }
        }
        // No FSM claims this pid: it was already reaped (or never tracked).
        // The source treats this as CRITICAL and otherwise ignores it —
        // one child's bookkeeping gap must never affect its siblings.
        self.logger.crit(format!("reaped untracked pid {pid}"));
    }

    fn handle_op(&mut self, op: ControlOp) {
        match op {
            ControlOp::Status(reply) => {
                let rows = self
                    .groups
                    .values()
                    .flat_map(|group| {
                        group.processes.iter().map(move |process| ProcessStatus {
                            group: group.name.clone(),
                            name: process.name().to_string(),
                            state: process.state.as_str(),
                            pid: process.pid,
                            backoff: process.backoff,
                            exit_code: process.exit_status.and_then(|e| e.code),
                            uptime_secs: process
                                .pid
                                .map(|_| crate::clock::now_secs().saturating_sub(process.laststart)),
                        })
                    })
                    .collect();
                let _ = reply.send(rows);
            }
            ControlOp::Start(target, reply) => {
                let result = self.with_process(&target, |process| {
                    process.clear_fatal();
                    process.spawn();
                });
                let _ = reply.send(result);
            }
            ControlOp::Stop(target, reply) => {
                let result = self.with_process(&target, |process| process.stop());
                let _ = reply.send(result);
            }
            ControlOp::Restart(target, reply) => {
                let result = self.with_process(&target, |process| {
                    if process.state.is_running() {
                        process.stop();
                    } else {
                        process.clear_fatal();
                        process.spawn();
                    }
                });
                let _ = reply.send(result);
            }
            ControlOp::Tail(target, stream, reply) => {
                let result = self.find_process(&target).map_or_else(
                    || Err(format!("no such process: {}:{}", target.group, target.name)),
                    |process| {
                        let bytes = match stream {
                            TailStream::Stdout => process.tail_stdout(),
                            TailStream::Stderr => process.tail_stderr(),
                        };
                        Ok(bytes.unwrap_or_default())
                    },
                );
                let _ = reply.send(result);
            }
            ControlOp::Shutdown(reply) => {
                self.mood = Mood::ShuttingDown;
                self.stop_all_by_priority();
                let _ = reply.send(());
            }
        }
    }

    fn find_process(&self, target: &crate::control::ProcessRef) -> Option<&crate::process::ProcessFsm> {
        self.groups.get(&target.group).and_then(|g| g.find(&target.name))
    }

    fn with_process(
        &mut self,
        target: &crate::control::ProcessRef,
        f: impl FnOnce(&mut crate::process::ProcessFsm),
    ) -> Result<(), String> {
        let group = self
            .groups
            .get_mut(&target.group)
            .ok_or_else(|| format!("no such group: {}", target.group))?;
        let process = group
            .find_mut(&target.name)
            .ok_or_else(|| format!("no such process: {}:{}", target.group, target.name))?;
        f(process);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutorestartPolicy, ProcessConfig, ProcessGroupConfig};
    use crate::control::ProcessRef;
    use crate::logger::Level;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    fn program(name: &str, command: &[&str], startretries: u32, stopwaitsecs: u64) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
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
            autorestart: AutorestartPolicy::Never,
            startsecs: 0,
            startretries,
            stopsignal: "TERM".to_string(),
            stopwaitsecs,
            exitcodes: vec![0],
        }
    }

    fn single_group(config: ProcessConfig, tx: mpsc::Sender<LoopEvent>) -> HashMap<String, ProcessGroup> {
        let mut map = HashMap::new();
        map.insert(
            "g".to_string(),
            ProcessGroup::from_config(
                ProcessGroupConfig { name: "g".to_string(), priority: 0, programs: vec![config] },
                tx,
            ),
        );
        map
    }

    async fn status_rows(tx: &mpsc::Sender<LoopEvent>) -> Vec<ProcessStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(LoopEvent::Control(ControlOp::Status(reply_tx))).await.unwrap();
        reply_rx.await.unwrap()
    }

    async fn shut_down(tx: &mpsc::Sender<LoopEvent>, handle: tokio::task::JoinHandle<(LoopExit, mpsc::Receiver<LoopEvent>)>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(LoopEvent::Control(ControlOp::Shutdown(reply_tx))).await.unwrap();
        reply_rx.await.unwrap();
        handle.await.unwrap();
    }

    // Scenario 1: autostart a well-behaved child and watch it settle in
    // RUNNING with a real pid, all driven through a real spawned `sleep`.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn autostart_settles_in_running_with_a_real_child() {
        let (tx, rx) = mpsc::channel(16);
        let groups = single_group(program("sleeper", &["sleep", "5"], 1, 1), tx.clone());
        let event_loop = EventLoop::new(groups, rx, SignalSink::install(), Logger::new(Level::Info));
        let handle = tokio::spawn(event_loop.run());

        tokio::time::sleep(Duration::from_millis(1200)).await;

        let rows = status_rows(&tx).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, "RUNNING");
        assert!(rows[0].pid.is_some());
        assert!(rows[0].uptime_secs.is_some());

        shut_down(&tx, handle).await;
    }

    // Scenario 2: a program that exits immediately every time exhausts its
    // start retries and lands in FATAL, via real spawned `false` children.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_early_exit_exhausts_retries_into_fatal() {
        let (tx, rx) = mpsc::channel(16);
        let groups = single_group(program("crasher", &["false"], 2, 1), tx.clone());
        let event_loop = EventLoop::new(groups, rx, SignalSink::install(), Logger::new(Level::Info));
        let handle = tokio::spawn(event_loop.run());

        tokio::time::sleep(Duration::from_millis(2600)).await;

        let rows = status_rows(&tx).await;
        assert_eq!(rows[0].state, "FATAL");

        shut_down(&tx, handle).await;
    }

    // Scenario 3: an operator stop against a child that ignores SIGTERM
    // escalates to SIGKILL once stopwaitsecs elapses.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_against_a_term_ignoring_child_escalates_to_kill() {
        let (tx, rx) = mpsc::channel(16);
        let groups = single_group(
            program("stubborn", &["sh", "-c", "trap '' TERM; sleep 5"], 1, 1),
            tx.clone(),
        );
        let event_loop = EventLoop::new(groups, rx, SignalSink::install(), Logger::new(Level::Info));
        let handle = tokio::spawn(event_loop.run());

        tokio::time::sleep(Duration::from_millis(200)).await;

        let (stop_reply_tx, stop_reply_rx) = oneshot::channel();
        tx.send(LoopEvent::Control(ControlOp::Stop(
            ProcessRef { group: "g".to_string(), name: "stubborn".to_string() },
            stop_reply_tx,
        )))
        .await
        .unwrap();
        stop_reply_rx.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(2400)).await;

        let rows = status_rows(&tx).await;
        assert_eq!(rows[0].state, "STOPPED");

        shut_down(&tx, handle).await;
    }

    // Scenario 6: an unknown target addressed through the control surface
    // comes back as an error rather than silently doing nothing.
    #[tokio::test]
    async fn start_against_an_unknown_process_reports_not_found() {
        let (tx, rx) = mpsc::channel(16);
        let groups = single_group(program("only", &["/bin/true"], 1, 1), tx.clone());
        let event_loop = EventLoop::new(groups, rx, SignalSink::install(), Logger::new(Level::Info));
        let handle = tokio::spawn(event_loop.run());

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(LoopEvent::Control(ControlOp::Start(
            ProcessRef { group: "g".to_string(), name: "missing".to_string() },
            reply_tx,
        )))
        .await
        .unwrap();
        assert!(reply_rx.await.unwrap().is_err());

        shut_down(&tx, handle).await;
    }
}
