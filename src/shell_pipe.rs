//! One-directional pipes to a command run through the command interpreter.

use crate::channel::ReadOutcome;
use crate::config::{Config, MAX_READ_CHUNK};
use crate::error::{ProcessError, Result};
use std::fmt;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::str::FromStr;
use tracing::{debug, warn};

/// Direction of a [`ShellPipe`], fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// The caller reads the command's standard output.
    Read,
    /// The caller writes the command's standard input.
    Write,
}

impl FromStr for PipeMode {
    type Err = ProcessError;

    /// Accepts exactly `"r"` or `"w"`.
    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(PipeMode::Read),
            "w" => Ok(PipeMode::Write),
            other => Err(ProcessError::invalid(format!(
                "pipe mode must be \"r\" or \"w\", got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for PipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeMode::Read => f.write_str("r"),
            PipeMode::Write => f.write_str("w"),
        }
    }
}

enum Stream {
    Reader(BufReader<ChildStdout>),
    Writer(BufWriter<ChildStdin>),
}

/// A command started through the interpreter with one buffered stream attached.
///
/// The exit status is only available from [`close`](Self::close), which may be
/// called once. A pipe that is dropped without `close` still releases its
/// stream and reaps the child, but the status is lost.
pub struct ShellPipe {
    command: String,
    mode: PipeMode,
    read_chunk: usize,
    stream: Option<Stream>,
    child: Option<Child>,
}

impl fmt::Debug for ShellPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellPipe")
            .field("command", &self.command)
            .field("mode", &self.mode)
            .field("pid", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ShellPipe {
    /// Run `command` through `/bin/sh -c` with the default configuration.
    pub fn open(command: &str, mode: &str) -> Result<Self> {
        Self::open_with(&Config::default(), command, mode)
    }

    /// Run `command` through the configured interpreter.
    ///
    /// `mode` must be `"r"` or `"w"`. The stream not selected by `mode`, and
    /// standard error, are inherited from the current process.
    pub fn open_with(config: &Config, command: &str, mode: &str) -> Result<Self> {
        let mode: PipeMode = mode.parse()?;
        let read_chunk = config.read_chunk.clamp(1, MAX_READ_CHUNK);

        let mut cmd = std::process::Command::new(&config.shell);
        cmd.arg(&config.shell_flag).arg(command);
        match mode {
            PipeMode::Read => cmd.stdout(Stdio::piped()),
            PipeMode::Write => cmd.stdin(Stdio::piped()),
        };

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stream = match mode {
            PipeMode::Read => child
                .stdout
                .take()
                .map(|out| Stream::Reader(BufReader::with_capacity(read_chunk, out))),
            PipeMode::Write => child.stdin.take().map(|input| Stream::Writer(BufWriter::new(input))),
        };
        let Some(stream) = stream else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Spawn {
                command: command.to_string(),
                source: std::io::Error::other("child stream was not captured"),
            });
        };

        debug!(command, %mode, pid = child.id(), "opened shell pipe");
        Ok(Self {
            command: command.to_string(),
            mode,
            read_chunk,
            stream: Some(stream),
            child: Some(child),
        })
    }

    pub fn mode(&self) -> PipeMode {
        self.mode
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Process id of the interpreter, until the pipe is closed.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Read up to one chunk of the command's output.
    ///
    /// Blocks until the chunk is full or the stream ends, so callers drain
    /// arbitrary output by looping until [`ReadOutcome::EndOfStream`].
    pub fn read(&mut self) -> Result<ReadOutcome> {
        let chunk = self.read_chunk;
        let reader = match self.stream.as_mut() {
            Some(Stream::Reader(reader)) => reader,
            Some(Stream::Writer(_)) => {
                return Err(ProcessError::invalid("pipe was opened for writing"));
            }
            None => return Err(ProcessError::ClosedChannel),
        };

        let mut buf = vec![0u8; chunk];
        let mut filled = 0;
        while filled < chunk {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        buf.truncate(filled);
        Ok(ReadOutcome::Data(buf))
    }

    /// Write the whole buffer to the command's input.
    ///
    /// Data may stay in the pipe's buffer until [`flush`](Self::flush) or
    /// [`close`](Self::close).
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer()?;
        writer.write_all(data)?;
        Ok(())
    }

    /// Push buffered input through to the command.
    pub fn flush(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<ChildStdin>> {
        match self.stream.as_mut() {
            Some(Stream::Writer(writer)) => Ok(writer),
            Some(Stream::Reader(_)) => Err(ProcessError::invalid("pipe was opened for reading")),
            None => Err(ProcessError::ClosedChannel),
        }
    }

    /// Close the stream, wait for the command, and return its raw wait status
    /// (the value `pclose` would return, e.g. `256` for `exit 1` on Linux).
    ///
    /// A second call fails with [`ProcessError::ClosedChannel`].
    pub fn close(&mut self) -> Result<i32> {
        let stream = self.stream.take().ok_or(ProcessError::ClosedChannel)?;
        release_stream(&self.command, stream);

        let mut child = self.child.take().ok_or(ProcessError::ClosedChannel)?;
        let status = child.wait()?;
        debug!(command = %self.command, %status, "closed shell pipe");
        Ok(status.into_raw())
    }
}

fn release_stream(command: &str, stream: Stream) {
    if let Stream::Writer(mut writer) = stream {
        // The command may have exited without reading everything.
        if let Err(e) = writer.flush() {
            debug!(command, error = %e, "discarding unflushed pipe input");
        }
    }
}

impl Drop for ShellPipe {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            warn!(command = %self.command, "shell pipe dropped without close");
            release_stream(&self.command, stream);
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.wait() {
                warn!(command = %self.command, error = %e, "failed to reap shell pipe child");
            }
        }
    }
}
