//! Spawning programs with all three standard streams redirected to pipes.
//!
//! The child is created with `fork`, rewires descriptors 0, 1 and 2 onto its
//! ends of three pipes and calls `execvp`. Everything the child needs is
//! allocated before the fork; after it, the child only makes
//! async-signal-safe calls. Pipe ends are [`OwnedFd`]s until they are handed
//! to a [`ByteChannel`], so every early return closes whatever was created.

use crate::argv::Argv;
use crate::channel::ByteChannel;
use crate::config::Config;
use crate::error::{ProcessError, Result};
use crate::value::Value;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use tracing::{debug, trace};

const EXEC_FAILED_MSG: &[u8] = b"spawn: exec failed\n";

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal termination with this exit code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Shell-style status: the exit code, or `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {code}"),
            ExitStatus::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// A running child and the parent's ends of its standard streams.
///
/// The three channels are independent: closing or dropping one leaves the
/// others open. Reaping is up to the caller; dropping a `Subprocess` does
/// not wait for the child.
#[derive(Debug)]
pub struct Subprocess {
    pid: Pid,
    status: Option<ExitStatus>,
    /// Write end connected to the child's standard input.
    pub stdin: ByteChannel,
    /// Read end connected to the child's standard output.
    pub stdout: ByteChannel,
    /// Read end connected to the child's standard error.
    pub stderr: ByteChannel,
}

impl Subprocess {
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Split into `(stdin, stdout, stderr, pid)`.
    pub fn into_parts(self) -> (ByteChannel, ByteChannel, ByteChannel, i32) {
        (self.stdin, self.stdout, self.stderr, self.pid.as_raw())
    }

    /// Block until the child ends and return how it ended.
    ///
    /// The status is cached, so calling this again returns the same value.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = wait_pid(self.pid.as_raw())?;
        self.status = Some(status);
        Ok(status)
    }

    /// Reap the child if it has already ended, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = wait_for(self.pid, Some(WaitPidFlag::WNOHANG))?;
        }
        Ok(self.status)
    }
}

/// Block until the child with id `pid` ends.
///
/// For callers that only kept the pid, e.g. after [`Subprocess::into_parts`].
pub fn wait_pid(pid: i32) -> Result<ExitStatus> {
    let pid = Pid::from_raw(pid);
    loop {
        if let Some(status) = wait_for(pid, None)? {
            debug!(pid = pid.as_raw(), %status, "subprocess reaped");
            return Ok(status);
        }
    }
}

fn wait_for(pid: Pid, flags: Option<WaitPidFlag>) -> Result<Option<ExitStatus>> {
    loop {
        return match waitpid(pid, flags) {
            Ok(WaitStatus::Exited(_, code)) => Ok(Some(ExitStatus::Exited(code))),
            Ok(WaitStatus::Signaled(_, signal, _)) => Ok(Some(ExitStatus::Signaled(signal as i32))),
            Ok(_) => Ok(None),
            Err(nix::Error::EINTR) => continue,
            Err(source) => Err(ProcessError::Os {
                op: "waitpid",
                source,
            }),
        };
    }
}

/// Spawn `argv[0]` with the default configuration.
pub fn spawn(argv: &Argv) -> Result<Subprocess> {
    spawn_with(&Config::default(), argv)
}

/// Build an argv from a runtime value, then spawn it.
pub fn spawn_value(config: &Config, value: &Value) -> Result<Subprocess> {
    let argv = Argv::from_value(value)?;
    spawn_with(config, &argv)
}

/// Spawn `argv[0]`, searched for in `PATH`, with `argv` as its arguments.
///
/// Fails with [`ProcessError::Os`] if a pipe cannot be created or the fork
/// fails; no descriptors are left open in either case. A program that cannot
/// be executed is not an error here: the child reports it on its standard
/// error and exits with `config.exec_failure_status`.
pub fn spawn_with(config: &Config, argv: &Argv) -> Result<Subprocess> {
    if argv.is_empty() {
        return Err(ProcessError::invalid("argv must name a program"));
    }
    let ptrs = argv.as_ptrs();
    let pipes = StdioPipes::create()?;

    // SAFETY: the child branch only calls async-signal-safe functions and
    // never returns into Rust code.
    match unsafe { fork() }.map_err(ProcessError::os("fork"))? {
        ForkResult::Child => unsafe { exec_child(&ptrs, &pipes, config.exec_failure_status) },
        ForkResult::Parent { child } => {
            let StdioPipes {
                stdin: (stdin_read, stdin_write),
                stdout: (stdout_read, stdout_write),
                stderr: (stderr_read, stderr_write),
            } = pipes;
            drop(stdin_read);
            drop(stdout_write);
            drop(stderr_write);

            debug!(
                pid = child.as_raw(),
                program = ?argv.program(),
                args = argv.len(),
                "spawned subprocess"
            );
            Ok(Subprocess {
                pid: child,
                status: None,
                stdin: ByteChannel::from_owned_fd(stdin_write, "stdin"),
                stdout: ByteChannel::from_owned_fd(stdout_read, "stdout"),
                stderr: ByteChannel::from_owned_fd(stderr_read, "stderr"),
            })
        }
    }
}

/// The six ends of the three standard-stream pipes, as `(read, write)`.
struct StdioPipes {
    stdin: (OwnedFd, OwnedFd),
    stdout: (OwnedFd, OwnedFd),
    stderr: (OwnedFd, OwnedFd),
}

impl StdioPipes {
    fn create() -> Result<Self> {
        let stdin = cloexec_pipe()?;
        let stdout = cloexec_pipe()?;
        let stderr = cloexec_pipe()?;
        trace!(
            stdin = ?(stdin.0.as_raw_fd(), stdin.1.as_raw_fd()),
            stdout = ?(stdout.0.as_raw_fd(), stdout.1.as_raw_fd()),
            stderr = ?(stderr.0.as_raw_fd(), stderr.1.as_raw_fd()),
            "created stdio pipes"
        );
        Ok(Self {
            stdin,
            stdout,
            stderr,
        })
    }

    fn child_ends(&self) -> [RawFd; 3] {
        [
            self.stdin.0.as_raw_fd(),
            self.stdout.1.as_raw_fd(),
            self.stderr.1.as_raw_fd(),
        ]
    }

    fn all(&self) -> [RawFd; 6] {
        [
            self.stdin.0.as_raw_fd(),
            self.stdin.1.as_raw_fd(),
            self.stdout.0.as_raw_fd(),
            self.stdout.1.as_raw_fd(),
            self.stderr.0.as_raw_fd(),
            self.stderr.1.as_raw_fd(),
        ]
    }
}

/// A pipe whose ends are not inherited by unrelated children.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(ProcessError::os("pipe"))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};

    let (read, write) = nix::unistd::pipe().map_err(ProcessError::os("pipe"))?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(ProcessError::os("fcntl"))?;
    }
    Ok((read, write))
}

/// Child side of the fork: redirect, exec, or `_exit`.
///
/// # Safety
///
/// Must only be called in a freshly forked child. `argv` must be a
/// NULL-terminated array whose first entry is non-null.
unsafe fn exec_child(argv: &[*const c_char], pipes: &StdioPipes, failure_status: i32) -> ! {
    unsafe {
        let mut sources = pipes.child_ends();

        // A source sitting on 0, 1 or 2 would be clobbered by an earlier dup2.
        for fd in sources.iter_mut() {
            if *fd <= libc::STDERR_FILENO {
                let moved = libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1);
                if moved < 0 {
                    libc::_exit(failure_status);
                }
                *fd = moved;
            }
        }

        for (target, source) in sources.into_iter().enumerate() {
            if libc::dup2(source, target as RawFd) < 0 {
                libc::_exit(failure_status);
            }
        }

        for fd in pipes.all().into_iter().chain(sources) {
            if fd > libc::STDERR_FILENO {
                libc::close(fd);
            }
        }

        // Ignored signals survive exec; the Rust runtime ignores SIGPIPE.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        libc::execvp(argv[0], argv.as_ptr());

        libc::write(
            libc::STDERR_FILENO,
            EXEC_FAILED_MSG.as_ptr().cast(),
            EXEC_FAILED_MSG.len(),
        );
        libc::_exit(failure_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ReadOutcome;
    use std::thread;

    fn argv(args: &[&str]) -> Argv {
        Argv::new(args).unwrap()
    }

    #[test]
    fn test_echo_hello() {
        let mut child = spawn(&argv(&["echo", "hello"])).unwrap();
        assert!(child.pid() > 0);
        assert_eq!(child.stdout.read_to_end().unwrap(), b"hello\n".to_vec());
        assert_eq!(child.stderr.read(4096).unwrap(), ReadOutcome::EndOfStream);
        assert_eq!(child.wait().unwrap(), ExitStatus::Exited(0));
    }

    #[test]
    fn test_missing_program_still_returns_pid() {
        let mut child = spawn(&argv(&["nonexistent-binary-xyz"])).unwrap();
        assert!(child.pid() > 0);
        assert_eq!(child.stdout.read(4096).unwrap(), ReadOutcome::EndOfStream);
        assert_eq!(child.stderr.read_to_end().unwrap(), EXEC_FAILED_MSG.to_vec());
        assert_eq!(child.wait().unwrap(), ExitStatus::Exited(127));
    }

    #[test]
    fn test_custom_exec_failure_status() {
        let config = Config::default().with_exec_failure_status(99);
        let mut child = spawn_with(&config, &argv(&["nonexistent-binary-xyz"])).unwrap();
        assert_eq!(child.wait().unwrap(), ExitStatus::Exited(99));
    }

    #[test]
    fn test_cat_round_trip() {
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let (mut stdin, mut stdout, _stderr, pid) = spawn(&argv(&["cat"])).unwrap().into_parts();
        assert!(pid > 0);

        let expected = payload.clone();
        let writer = thread::spawn(move || {
            stdin.write_all(&payload).unwrap();
            stdin.close();
        });

        let mut received = Vec::new();
        while let ReadOutcome::Data(chunk) = stdout.read(4096).unwrap() {
            received.extend_from_slice(&chunk);
        }
        writer.join().unwrap();
        assert_eq!(received, expected);

        assert_eq!(wait_pid(pid).unwrap(), ExitStatus::Exited(0));
        assert!(matches!(
            wait_pid(pid),
            Err(ProcessError::Os { op: "waitpid", .. })
        ));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut child = spawn(&argv(&["sh", "-c", "cat >&2"])).unwrap();
        child.stdout.close();

        child.stdin.write_all(b"still open").unwrap();
        child.stdin.close();

        assert_eq!(child.stderr.read_to_end().unwrap(), b"still open".to_vec());
        assert!(child.wait().unwrap().success());
    }

    #[test]
    fn test_exit_and_signal_statuses() {
        let mut exited = spawn(&argv(&["sh", "-c", "exit 7"])).unwrap();
        assert_eq!(exited.wait().unwrap(), ExitStatus::Exited(7));
        assert_eq!(exited.wait().unwrap(), ExitStatus::Exited(7));

        let mut killed = spawn(&argv(&["sh", "-c", "kill -TERM $$"])).unwrap();
        let status = killed.wait().unwrap();
        assert_eq!(status, ExitStatus::Signaled(libc::SIGTERM));
        assert_eq!(status.code(), 128 + libc::SIGTERM);
    }

    #[test]
    fn test_child_gets_default_sigpipe() {
        let mut child = spawn(&argv(&["yes"])).unwrap();
        assert!(matches!(child.stdout.read(16).unwrap(), ReadOutcome::Data(_)));
        child.stdout.close();
        assert_eq!(child.wait().unwrap(), ExitStatus::Signaled(libc::SIGPIPE));
    }

    #[test]
    fn test_try_wait() {
        let mut child = spawn(&argv(&["sh", "-c", "read line; exit 4"])).unwrap();
        assert_eq!(child.try_wait().unwrap(), None);
        child.stdin.write_all(b"go\n").unwrap();
        assert_eq!(child.wait().unwrap(), ExitStatus::Exited(4));
        assert_eq!(child.try_wait().unwrap(), Some(ExitStatus::Exited(4)));
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        let err = spawn(&Argv::new(Vec::<String>::new()).unwrap()).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidArgument(_)));
    }

    #[test]
    fn test_spawn_value_rejects_non_strings() {
        let value = Value::Array(vec![Value::from("echo"), Value::Undefined]);
        let err = spawn_value(&Config::default(), &value).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidArgument(_)));
    }

    #[test]
    fn test_spawn_value() {
        let value = Value::Array(vec![Value::from("printf"), Value::from("%s-%s"), Value::from("a"), Value::from("b")]);
        let mut child = spawn_value(&Config::default(), &value).unwrap();
        assert_eq!(child.stdout.read_to_end().unwrap(), b"a-b".to_vec());
        assert!(child.wait().unwrap().success());
    }

    #[test]
    fn test_dropping_stdio_pipes_releases_every_end() {
        use nix::sys::stat::fstat;

        let pipes = StdioPipes::create().unwrap();
        let ends: Vec<(RawFd, libc::ino_t)> = pipes
            .all()
            .into_iter()
            .map(|fd| (fd, fstat(fd).unwrap().st_ino))
            .collect();
        drop(pipes);

        for (fd, inode) in ends {
            if let Ok(stat) = fstat(fd) {
                assert_ne!(stat.st_ino, inode, "fd {fd} still open");
            }
        }
    }
}
