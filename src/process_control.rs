//! Process-wide operations: terminating the process and locating it.

use crate::error::{ProcessError, Result};
use std::path::PathBuf;
use tracing::debug;

/// Terminate the current process with `code`, or 0 when `None`.
///
/// This does not return and does not unwind: destructors of live objects do
/// not run, exactly like the C `exit` call.
pub fn exit(code: Option<i32>) -> ! {
    let code = code.unwrap_or(0);
    debug!(code, "exiting process");
    std::process::exit(code)
}

/// Absolute path of the current working directory.
///
/// Fails with [`ProcessError::Os`] when the OS cannot report it, for example
/// after the directory has been removed.
pub fn current_directory() -> Result<PathBuf> {
    nix::unistd::getcwd().map_err(ProcessError::os("getcwd"))
}
