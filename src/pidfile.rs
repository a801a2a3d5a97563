//! Pid file lifecycle: write after daemonizing, remove on clean exit.

use std::fs;
use std::path::Path;

use crate::error::SupervisorError;

pub fn write(path: &str) -> Result<(), SupervisorError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| SupervisorError::Pidfile(format!("{path}: {e}")))?;
        }
    }
    fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|e| SupervisorError::Pidfile(format!("{path}: {e}")))
}

pub fn remove(path: &str) {
    let _ = fs::remove_file(path);
}
