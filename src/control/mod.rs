//! Control surface: the concrete realization of the source's abstract
//! dispatcher contract (`readable`/`writable`/`handle_read_event`/
//! `handle_write_event`/`handle_error`, with an `ExitNow` sentinel raised to
//! unwind the main loop on fatal I/O error).
//!
//! Here that contract is an `axum` HTTP server whose handlers never touch
//! FSM state directly — they send a [`ControlOp`] over an `mpsc` channel
//! to the event loop and await
//! the loop's reply on a `oneshot`, preserving the "single task owns all
//! mutable state" invariant the whole kernel depends on.

pub mod server;

use tokio::sync::oneshot;

/// Raised by a dispatcher when its channel is unrecoverably broken,
/// mirroring the source's `ExitNow` exception used to unwind `runforever`.
#[derive(Debug)]
pub struct ExitNow;

/// A process identified by its group and program name, as addressed by the
/// control surface's path segments.
#[derive(Debug, Clone)]
pub struct ProcessRef {
    pub group: String,
    pub name: String,
}

/// One snapshot row for the `/status` endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessStatus {
    pub group: String,
    pub name: String,
    pub state: &'static str,
    pub pid: Option<u32>,
    pub backoff: u32,
    pub exit_code: Option<i32>,
    /// Seconds since `laststart`, while a pid is held; `None` otherwise.
    pub uptime_secs: Option<u64>,
}

/// Which tail ring an operator is asking to read.
#[derive(Debug, Clone, Copy)]
pub enum TailStream {
    Stdout,
    Stderr,
}

/// Operations the control surface can request of the event loop. Every
/// variant carries a `oneshot::Sender` for the reply, so handlers never
/// block the loop longer than one channel round-trip.
pub enum ControlOp {
    Status(oneshot::Sender<Vec<ProcessStatus>>),
    Start(ProcessRef, oneshot::Sender<Result<(), String>>),
    Stop(ProcessRef, oneshot::Sender<Result<(), String>>),
    Restart(ProcessRef, oneshot::Sender<Result<(), String>>),
    Tail(ProcessRef, TailStream, oneshot::Sender<Result<Vec<u8>, String>>),
    Shutdown(oneshot::Sender<()>),
}
