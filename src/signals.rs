//! Signal delivery into the event loop.
//!
//! The source's `signal.signal()` handlers only ever touch one global
//! variable (`options.signal_received`, "last signal wins") because
//! anything more in an async-signal-safe handler risks reentrancy bugs.
//! `tokio::signal::unix::signal` moves that work off the actual signal
//! handler and onto a normal task, so the same "single slot, last signal
//! wins" design is kept here purely for continuity with the source's
//! semantics, not because it's still a safety requirement.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

/// Signals the kernel reacts to, matching the source's `handle_signal`
/// dispatch: SIGTERM/SIGINT/SIGQUIT request shutdown, SIGHUP requests a
/// reload, SIGUSR2 requests a log reopen (rotation-adjacent housekeeping).
pub struct SignalSink {
    slot: Arc<AtomicI32>,
    _tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SignalSink {
    /// Install listeners for every signal the kernel understands. Panics if
    /// the underlying `signal()` registration fails (only possible if
    /// called outside a tokio runtime or for an unsupported signal number,
    /// both startup-time bugs).
    pub fn install() -> Self {
        let slot = Arc::new(AtomicI32::new(0));
        let kinds = [
            SignalKind::terminate(),
            SignalKind::interrupt(),
            SignalKind::quit(),
            SignalKind::hangup(),
            SignalKind::user_defined2(),
        ];

        let mut tasks = Vec::new();
        for kind in kinds {
            let mut stream = signal(kind).expect("failed to install signal handler");
            let slot = Arc::clone(&slot);
            let raw = kind_to_raw(kind);
            tasks.push(tokio::spawn(async move {
                loop {
                    if stream.recv().await.is_none() {
                        break;
                    }
                    slot.store(raw, Ordering::SeqCst);
                }
            }));
        }

        Self { slot, _tasks: tasks }
    }

    /// Read and clear the pending signal, if any (source: `get_signal()`).
    pub fn take(&self) -> Option<i32> {
        let value = self.slot.swap(0, Ordering::SeqCst);
        if value == 0 {
            None
        } else {
            Some(value)
        }
    }
}

fn kind_to_raw(kind: SignalKind) -> i32 {
    if kind == SignalKind::terminate() {
        libc::SIGTERM
    } else if kind == SignalKind::interrupt() {
        libc::SIGINT
    } else if kind == SignalKind::quit() {
        libc::SIGQUIT
    } else if kind == SignalKind::hangup() {
        libc::SIGHUP
    } else if kind == SignalKind::user_defined2() {
        libc::SIGUSR2
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a bare slot without installing any OS signal listeners, so
    /// the collapse-to-last-write contract can be tested deterministically
    /// instead of racing real `kill()`-delivered signals against other
    /// tests running in the same process.
    fn bare() -> SignalSink {
        SignalSink { slot: Arc::new(AtomicI32::new(0)), _tasks: Vec::new() }
    }

    #[test]
    fn take_clears_the_slot() {
        let sink = bare();
        sink.slot.store(libc::SIGTERM, Ordering::SeqCst);
        assert_eq!(sink.take(), Some(libc::SIGTERM));
        assert_eq!(sink.take(), None);
    }

    #[test]
    fn a_burst_of_signals_collapses_to_the_last_one_written() {
        let sink = bare();
        sink.slot.store(libc::SIGHUP, Ordering::SeqCst);
        sink.slot.store(libc::SIGUSR2, Ordering::SeqCst);
        assert_eq!(sink.take(), Some(libc::SIGUSR2));
        assert_eq!(sink.take(), None);
    }

    #[test]
    fn kind_to_raw_covers_every_installed_kind() {
        assert_eq!(kind_to_raw(SignalKind::terminate()), libc::SIGTERM);
        assert_eq!(kind_to_raw(SignalKind::interrupt()), libc::SIGINT);
        assert_eq!(kind_to_raw(SignalKind::quit()), libc::SIGQUIT);
        assert_eq!(kind_to_raw(SignalKind::hangup()), libc::SIGHUP);
        assert_eq!(kind_to_raw(SignalKind::user_defined2()), libc::SIGUSR2);
    }
}
