//! Dropping privileges to run a child as a configured user, matching the
//! source's `Subprocess.set_uid()` (resolved once at spawn time via
//! `pre_exec`, since `setuid` only affects the calling thread/process).

use std::ffi::CString;

/// Resolve a `uid` config value (numeric or username) to a raw uid, looking
/// up `/etc/passwd` via `getpwnam` for names.
pub fn resolve_uid(spec: &str) -> Option<u32> {
    if let Ok(uid) = spec.parse::<u32>() {
        return Some(uid);
    }
    let name = CString::new(spec).ok()?;
    unsafe {
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            None
        } else {
            Some((*pw).pw_uid)
        }
    }
}

/// Drop to the given uid and its primary gid. Called from within
/// `pre_exec`, so must be async-signal-safe: no allocation, no locking.
///
/// # Safety
/// Must only be called in a forked child before `exec`, per
/// `Command::pre_exec`'s contract.
pub unsafe fn drop_to_uid(uid: u32) -> std::io::Result<()> {
    let pw = libc::getpwuid(uid);
    if !pw.is_null() {
        if libc::setgid((*pw).pw_gid) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    if libc::setuid(uid) != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
