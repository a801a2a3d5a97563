//! Per-child output capture: draining a pipe into a log file and/or an
//! in-memory tail ring.
//!
//! The source's event loop drives capture through the `readable()` half of
//! its dispatcher contract, polled by `select()` alongside everything else.
//! Under tokio, that polling is better expressed as its own task per pipe,
//! draining stdout/stderr the way a managed session already does for
//! interactive shells. Each [`OutputCapture`] owns one such task; the
//! event loop only ever sees the table of handles, never the raw fds.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::config::ProcessConfig;
use crate::logger::{FileSink, RingSink, Sink};

/// Which pipe a capture task is draining — a child process only ever has
/// the two streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// A live handle to a capture task for one child's one stream. Dropping
/// this does not stop the task — call [`OutputCapture::close`] or let the
/// underlying pipe hit EOF when the child exits and is reaped.
pub struct OutputCapture {
    stream: Stream,
    tail: Option<RingSink>,
    task: JoinHandle<()>,
    notify: Arc<Notify>,
    reopen_tx: mpsc::UnboundedSender<()>,
}

impl OutputCapture {
    /// Spawn a task draining `reader` in raw byte chunks into `file_sink` (if
    /// the config names a logfile path) and a bounded tail ring (if
    /// `tail_bytes > 0`). Reads are chunked rather than line-buffered — a
    /// child's output isn't guaranteed to be line-delimited or valid UTF-8,
    /// and a decode error on one bad byte must never cost the rest of the
    /// child's output for its whole remaining lifetime, matching the
    /// chunk-and-lossy-decode idiom a managed session already uses for its
    /// own stdout/stderr. `notify` is signalled after every chunk so the
    /// event loop can treat "child produced output" as a wakeup source
    /// without polling.
    pub fn spawn<R>(
        stream: Stream,
        reader: R,
        program: &ProcessConfig,
        notify: Arc<Notify>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (logfile, maxbytes, backups) = match stream {
            Stream::Stdout => (
                program.stdout_logfile.clone(),
                program.stdout_logfile_maxbytes,
                program.stdout_logfile_backups,
            ),
            Stream::Stderr => (
                program.stderr_logfile.clone(),
                program.stderr_logfile_maxbytes,
                program.stderr_logfile_backups,
            ),
        };

        let file_sink: Option<FileSink> = logfile.and_then(|path| {
            FileSink::open(&path, maxbytes, backups)
                .map_err(|e| tracing::warn!(%path, error = %e, "failed to open child logfile"))
                .ok()
        });

        let tail = if program.tail_bytes > 0 {
            Some(RingSink::new(program.tail_bytes))
        } else {
            None
        };

        let mut file_sink = file_sink;
        let mut tail_writer = tail.clone();
        let task_notify = Arc::clone(&notify);
        let (reopen_tx, mut reopen_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    result = reader.read(&mut buf) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => {
                                let chunk = &buf[..n];
                                if let Some(sink) = file_sink.as_mut() {
                                    sink.write_raw(chunk);
                                }
                                if let Some(sink) = tail_writer.as_mut() {
                                    sink.write_raw(chunk);
                                }
                                task_notify.notify_one();
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "capture read error, stopping");
                                break;
                            }
                        }
                    }
                    Some(()) = reopen_rx.recv() => {
                        if let Some(sink) = file_sink.as_mut() {
                            if let Err(e) = sink.reopen() {
                                tracing::warn!(error = %e, "failed to reopen child logfile");
                            }
                        }
                    }
                }
            }
        });

        Self { stream, tail, task, notify, reopen_tx }
    }

    /// SIGUSR2: reopen this capture's file sink at the same configured path.
    /// A no-op if the capture's drain task has already exited (the sender
    /// is dropped along with the closed channel's other half, so the send
    /// silently fails).
    pub fn reopen(&self) {
        let _ = self.reopen_tx.send(());
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Snapshot of the retained tail bytes, if a ring was configured.
    pub fn tail_bytes(&self) -> Option<Vec<u8>> {
        self.tail.as_ref().map(RingSink::tail)
    }

    /// `Arc<Notify>` shared with the event loop's wakeup select.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// True once the pipe has hit EOF (or errored) and the task has exited.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the drain task early, e.g. when the kernel is shutting down and
    /// doesn't want to wait for a child's pipes to close naturally.
    pub fn close(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutorestartPolicy, ProcessConfig};
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_config(tail_bytes: usize, stdout_logfile: Option<String>) -> ProcessConfig {
        ProcessConfig {
            name: "t".to_string(),
            command: vec!["/bin/true".to_string()],
            working_dir: "/".to_string(),
            env: HashMap::new(),
            uid: None,
            umask: None,
            stdout_logfile,
            stdout_logfile_maxbytes: 0,
            stdout_logfile_backups: 0,
            stderr_logfile: None,
            stderr_logfile_maxbytes: 0,
            stderr_logfile_backups: 0,
            tail_bytes,
            autostart: true,
            autorestart: AutorestartPolicy::Never,
            startsecs: 0,
            startretries: 1,
            stopsignal: "TERM".to_string(),
            stopwaitsecs: 1,
            exitcodes: vec![0],
        }
    }

    #[tokio::test]
    async fn drains_real_child_output_into_tail_ring() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "printf hello"])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdout = child.stdout.take().unwrap();
        let config = test_config(64, None);
        let capture = OutputCapture::spawn(Stream::Stdout, stdout, &config, Arc::new(Notify::new()));

        let _ = child.wait().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let tail = capture.tail_bytes().unwrap();
        assert_eq!(String::from_utf8_lossy(&tail), "hello");
    }

    #[tokio::test]
    async fn reopen_swaps_to_a_fresh_file_at_the_same_path() {
        let dir = std::env::temp_dir().join(format!("wardend-capture-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("child.log");

        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "printf first; sleep 0.3; printf second"])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdout = child.stdout.take().unwrap();
        let config = test_config(0, Some(path.to_string_lossy().into_owned()));
        let capture = OutputCapture::spawn(Stream::Stdout, stdout, &config, Arc::new(Notify::new()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::rename(&path, path.with_extension("1")).unwrap();
        capture.reopen();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = child.wait().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let before = std::fs::read_to_string(path.with_extension("1")).unwrap();
        assert!(before.contains("first"));
        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.contains("second"));
        assert!(!after.contains("first"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
