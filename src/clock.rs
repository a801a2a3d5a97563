//! Single point of "what time is it" for the supervision kernel.
//!
//! FSM deadlines (`delay` for STARTING/BACKOFF/STOPPING) are epoch seconds
//! rather than `std::time::Instant` so they stay meaningful across a SIGHUP
//! reconstruction of the `Supervisor` (an `Instant` has no cross-instance
//! epoch). Every deadline comparison in this crate goes through [`now_secs`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
