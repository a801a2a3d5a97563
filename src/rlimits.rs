//! Resource limit checks at startup, matching the source's
//! `Options.cleanup_fds()`/`set_rlimits()` sanity pass: raise the open-file
//! limit toward its hard ceiling so a supervisor managing many children
//! doesn't run out of descriptors for their stdout/stderr pipes.

use tracing::warn;

/// Raise `RLIMIT_NOFILE` to its hard limit. Best-effort: failures are
/// logged, not fatal, since a restrictive hard limit set by the parent
/// environment (e.g. a container) isn't something the supervisor can fix.
pub fn raise_nofile_limit() {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    unsafe {
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) != 0 {
            warn!("getrlimit(RLIMIT_NOFILE) failed");
            return;
        }
        limit.rlim_cur = limit.rlim_max;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &limit) != 0 {
            warn!("setrlimit(RLIMIT_NOFILE) failed, continuing with existing limit");
        }
    }
}
