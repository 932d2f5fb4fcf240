use std::path::PathBuf;

/// Default number of bytes returned by a single pipe read.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Largest buffer a single read allocates.
pub const MAX_READ_CHUNK: usize = 1 << 20;

/// Status a forked child exits with when `execvp` fails.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Settings shared by the pipe and spawn primitives.
///
/// The configuration is built programmatically and passed in explicitly; the
/// library never reads environment variables to fill it in.
///
/// - `shell`: the command interpreter used by [`ShellPipe`](crate::ShellPipe).
/// - `shell_flag`: the flag that makes the interpreter run its next argument.
/// - `read_chunk`: upper bound on the bytes returned by one `read` call.
/// - `exec_failure_status`: exit status of a spawned child whose `execvp` failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub shell: PathBuf,
    pub shell_flag: String,
    pub read_chunk: usize,
    pub exec_failure_status: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            shell_flag: "-c".to_string(),
            read_chunk: DEFAULT_READ_CHUNK,
            exec_failure_status: EXEC_FAILURE_STATUS,
        }
    }
}

impl Config {
    /// Use a different command interpreter for shell pipes.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Change the read chunk size, kept within `1..=MAX_READ_CHUNK`.
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.clamp(1, MAX_READ_CHUNK);
        self
    }

    /// Change the status a child reports when its program cannot be executed.
    pub fn with_exec_failure_status(mut self, status: i32) -> Self {
        self.exec_failure_status = status;
        self
    }
}
