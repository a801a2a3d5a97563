//! Destinations for the supervisor's own log lines.
//!
//! Mirrors the source's `FileHandler`/`RotatingFileHandler`/`BoundIO` trio:
//! a plain file sink, a size-triggered rotating file sink, and an in-memory
//! ring used here for the control surface's tail endpoint rather than for
//! startup buffering.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Anything the logger can write a formatted line to.
pub trait Sink: Send {
    fn write_line(&mut self, line: &str);

    /// Close and reopen at the same destination, if the sink has one
    /// (SIGUSR2: `supervisord`'s `reopenlogs()`). A no-op for sinks with no
    /// underlying path, like [`StreamSink`] and [`RingSink`].
    fn reopen(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes to stdout. Used when `supervisor.log.file` is unset.
pub struct StreamSink;

impl Sink for StreamSink {
    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// A file sink with size-triggered rotation, matching the source's
/// `shouldRollover`/`doRollover`: when the next write would push the file
/// past `maxbytes`, the current file is renamed `.1` (cascading existing
/// `.1..N-1` up by one, dropping whatever would become `.N+1`) before the
/// write proceeds. `maxbytes == 0` disables rotation entirely.
pub struct FileSink {
    path: PathBuf,
    file: File,
    maxbytes: u64,
    backups: u32,
    size: u64,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>, maxbytes: u64, backups: u32) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { path, file, maxbytes, backups, size })
    }

    fn rollover(&mut self) -> io::Result<()> {
        if self.backups > 0 {
            let highest = self.path.with_extension(format!("{}", self.backups));
            if highest.exists() {
                fs::remove_file(&highest)?;
            }
            for i in (1..self.backups).rev() {
                let src = self.path.with_extension(format!("{i}"));
                if src.exists() {
                    let dst = self.path.with_extension(format!("{}", i + 1));
                    fs::rename(src, dst)?;
                }
            }
            fs::rename(&self.path, self.path.with_extension("1"))?;
        } else {
            fs::remove_file(&self.path)?;
        }
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Sink for FileSink {
    fn write_line(&mut self, line: &str) {
        if self.maxbytes > 0 && self.size + line.len() as u64 + 1 > self.maxbytes {
            if let Err(e) = self.rollover() {
                eprintln!("wardend: log rotation failed for {:?}: {e}", self.path);
            }
        }
        if let Err(e) = writeln!(self.file, "{line}") {
            eprintln!("wardend: log write failed for {:?}: {e}", self.path);
            return;
        }
        self.size += line.len() as u64 + 1;
    }

    /// SIGUSR2: close the current fd and reopen the same path, picking up
    /// a file an external logrotate (or an operator's `mv`) may have
    /// swapped out from under the open descriptor.
    fn reopen(&mut self) -> io::Result<()> {
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.size = self.file.metadata()?.len();
        Ok(())
    }
}

impl FileSink {
    /// Write a raw byte chunk with no implicit newline, for capture of a
    /// child's stdout/stderr — unlike the supervisor's own log lines, a
    /// child's output isn't guaranteed to be line-delimited or even valid
    /// UTF-8, so it's appended verbatim rather than through [`Sink::write_line`].
    /// Rotation is still size-triggered the same way.
    pub fn write_raw(&mut self, data: &[u8]) {
        if self.maxbytes > 0 && self.size + data.len() as u64 > self.maxbytes {
            if let Err(e) = self.rollover() {
                eprintln!("wardend: log rotation failed for {:?}: {e}", self.path);
            }
        }
        if let Err(e) = self.file.write_all(data) {
            eprintln!("wardend: log write failed for {:?}: {e}", self.path);
            return;
        }
        self.size += data.len() as u64;
    }
}

/// A bounded in-memory byte ring, shared via `Arc<Mutex<_>>` so a `Logger`
/// can hold a writer handle while the control server holds a reader handle
/// to the same backing buffer.
#[derive(Clone)]
pub struct RingSink {
    inner: Arc<Mutex<RingInner>>,
}

struct RingInner {
    buf: Vec<u8>,
    capacity: usize,
}

impl RingSink {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(RingInner { buf: Vec::new(), capacity })) }
    }

    /// Snapshot the currently retained bytes, oldest first.
    pub fn tail(&self) -> Vec<u8> {
        self.inner.lock().unwrap().buf.clone()
    }

    fn push(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let capacity = inner.capacity;
        inner.buf.extend_from_slice(bytes);
        if inner.buf.len() > capacity {
            let excess = inner.buf.len() - capacity;
            inner.buf.drain(0..excess);
        }
    }

    /// Append a raw byte chunk with no implicit newline. See
    /// [`FileSink::write_raw`] for why capture uses this instead of
    /// [`Sink::write_line`].
    pub fn write_raw(&self, data: &[u8]) {
        self.push(data);
    }
}

impl Sink for RingSink {
    fn write_line(&mut self, line: &str) {
        self.push(line.as_bytes());
        self.push(b"\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_sink_discards_oldest_past_capacity() {
        let mut sink = RingSink::new(8);
        sink.write_line("12345");
        sink.write_line("67890");
        let tail = sink.tail();
        assert!(tail.len() <= 8);
        assert!(String::from_utf8_lossy(&tail).ends_with("67890\n"));
    }

    #[test]
    fn file_sink_rotates_past_maxbytes() {
        let dir = std::env::temp_dir().join(format!("wardend-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sup.log");
        let mut sink = FileSink::open(&path, 10, 2).unwrap();
        sink.write_line("aaaaaaaaaa");
        sink.write_line("bbbbbbbbbb");
        assert!(path.with_extension("1").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopen_picks_up_a_path_swapped_out_from_under_it() {
        let dir = std::env::temp_dir().join(format!("wardend-test-reopen-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sup.log");
        let mut sink = FileSink::open(&path, 0, 0).unwrap();
        sink.write_line("before rotation");
        fs::rename(&path, path.with_extension("1")).unwrap();
        sink.reopen().unwrap();
        sink.write_line("after reopen");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "after reopen\n");
        fs::remove_dir_all(&dir).ok();
    }
}
