//! Double-fork daemonization, matching the source's `Options.daemonize()`:
//! fork, `setsid` to drop the controlling terminal, fork again so the
//! daemon can never reacquire one, redirect stdio to `/dev/null`.
//!
//! Must run before any tokio runtime is started — forking a multi-threaded
//! process only keeps the calling thread in the child, which would orphan
//! every other tokio worker thread. [`crate::main`] calls this ahead of
//! `#[tokio::main]`'s runtime construction.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;

use nix::unistd::{fork, setsid, ForkResult};

/// Fork into the background. The parent process calls this and exits
/// immediately; only the final grandchild returns.
pub fn daemonize() -> io::Result<()> {
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(io::Error::from)?;

    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    redirect_stdio()?;
    Ok(())
}

fn redirect_stdio() -> io::Result<()> {
    let dev_null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = dev_null.as_raw_fd();
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        unsafe {
            libc::dup2(fd, target);
        }
    }
    Ok(())
}
