//! Top-level orchestration: build groups from config, install signal
//! handlers, start the control surface, run the event loop until shutdown
//! or reload, clean up.
//!
//! Matches the source's `Supervisor`/`main()` split: configuration and
//! process-table construction happen once per reload cycle, while `mood`
//! and the reap/transition loop persist logically across a SIGHUP (the
//! surviving children are threaded through, even though the Rust
//! `Supervisor` value itself is reconstructed).

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::control::server::ControlHandle;
use crate::event_loop::{EventLoop, LoopExit};
use crate::logger::{FileSink, Logger, StreamSink};
use crate::process::ProcessGroup;
use crate::signals::SignalSink;

// Channel depth for the combined control-op / child-exit event stream. A
// burst of simultaneous exits (e.g. every child killed by the same signal)
// is the deepest this needs to absorb before the loop drains it on the
// next tick.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Run until a shutdown signal is handled and every child has stopped.
/// Loops internally across SIGHUP reloads; only returns once the kernel is
/// actually exiting.
pub async fn run_forever(config_path: Option<&str>) {
    crate::rlimits::raise_nofile_limit();

    let mut config = Config::load(config_path);
    let errors = config.validate();
    for err in &errors {
        tracing::error!("config error: {err}");
    }
    if !errors.is_empty() {
        std::process::exit(1);
    }

    // Daemonization (if configured) already happened in `main`, before the
    // tokio runtime was built — a fork after worker threads exist would
    // orphan them in the parent. Only the pidfile (which needs the final,
    // post-fork pid) is written here.
    if let Err(e) = crate::pidfile::write(&config.supervisor.pidfile) {
        tracing::error!("{e}");
        std::process::exit(1);
    }

    let mut adopted: Option<HashMap<String, ProcessGroup>> = None;
    // Created once, outside the reload loop: children adopted across a
    // SIGHUP keep the exit-watcher task (and sender) from their original
    // spawn, so the receive half must outlive any single `EventLoop`.
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    loop {
        let fresh: HashMap<String, ProcessGroup> = config
            .groups
            .iter()
            .cloned()
            .map(|gc| (gc.name.clone(), ProcessGroup::from_config(gc, event_tx.clone())))
            .collect();
        let groups = match adopted.take() {
            Some(previous) => adopt(fresh, previous),
            None => fresh,
        };

        let signals = SignalSink::install();
        let logger = build_logger(&config);

        let control_task = if config.control.enabled {
            let handle = ControlHandle::new(event_tx.clone());
            let listen = config.control.listen.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = crate::control::server::serve(&listen, handle).await {
                    tracing::error!("control server error: {e}");
                }
            }))
        } else {
            None
        };

        let event_loop = EventLoop::new(groups, event_rx, signals, logger);

        let (exit, returned_rx) = event_loop.run().await;
        event_rx = returned_rx;

        match exit {
            LoopExit::Shutdown => {
                if let Some(task) = control_task {
                    task.abort();
                }
                break;
            }
            LoopExit::Reload(groups) => {
                if let Some(task) = control_task {
                    task.abort();
                }
                info!("reloading configuration");
                config = Config::load(config_path);
                adopted = Some(groups);
            }
        }
    }

    crate::pidfile::remove(&config.supervisor.pidfile);
    info!("supervisor exiting");
}

/// Build the supervisor's own operator-facing logger from
/// `[supervisor.log]`: a file sink with rotation if a path is configured,
/// otherwise stdout. Rebuilt fresh each reload cycle, the same way groups
/// are, since SIGHUP re-reads the whole config file.
fn build_logger(config: &Config) -> Logger {
    let mut logger = Logger::new(config.log_level());
    logger = match &config.supervisor.log.file {
        Some(path) => match FileSink::open(
            path,
            config.supervisor.log.maxbytes,
            config.supervisor.log.backups,
        ) {
            Ok(sink) => logger.with_sink(Box::new(sink)),
            Err(e) => {
                tracing::error!(%path, error = %e, "failed to open supervisor logfile, falling back to stdout");
                logger.with_sink(Box::new(StreamSink))
            }
        },
        None => logger.with_sink(Box::new(StreamSink)),
    };
    logger
}

/// Merge a freshly-reloaded config's groups with the groups surviving a
/// SIGHUP, keeping each previously-running process's live state (pid,
/// captures, FSM state) in place of the freshly-constructed STOPPED one,
/// so a reload never interrupts an already-running child.
fn adopt(
    mut fresh: HashMap<String, ProcessGroup>,
    mut previous: HashMap<String, ProcessGroup>,
) -> HashMap<String, ProcessGroup> {
    for group in fresh.values_mut() {
        let Some(mut old_group) = previous.remove(&group.name) else { continue };
        for process in &mut group.processes {
            if let Some(pos) = old_group.processes.iter().position(|p| p.name() == process.name())
            {
                let old = old_group.processes.swap_remove(pos);
                if old.pid.is_some() {
                    *process = old;
                }
            }
        }
    }
    fresh
}
