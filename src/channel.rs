//! Owned, closable byte streams over a single OS descriptor.

use crate::config::MAX_READ_CHUNK;
use crate::error::{ProcessError, Result};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use tracing::{debug, trace};

/// Result of a read that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// At least one byte was read.
    Data(Vec<u8>),
    /// The writer side is gone and no bytes remain.
    EndOfStream,
}

impl ReadOutcome {
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            ReadOutcome::Data(data) => Some(data),
            ReadOutcome::EndOfStream => None,
        }
    }
}

/// What `close` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// The descriptor was open and has now been released.
    Closed,
    /// The channel had already been closed; nothing happened.
    AlreadyClosed,
}

/// A byte stream that exclusively owns one OS descriptor.
///
/// The descriptor is released exactly once: by the first [`close`](Self::close)
/// or, failing that, when the channel is dropped.
#[derive(Debug)]
pub struct ByteChannel {
    file: Option<File>,
    name: &'static str,
}

impl ByteChannel {
    /// Take ownership of `fd`. `name` only labels log events.
    pub fn from_owned_fd(fd: OwnedFd, name: &'static str) -> Self {
        Self {
            file: Some(File::from(fd)),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Raw descriptor number while the channel is open.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Read whatever is available, up to `max` bytes, blocking until at least
    /// one byte arrives or the stream ends. `max` is capped at
    /// [`MAX_READ_CHUNK`].
    pub fn read(&mut self, max: usize) -> Result<ReadOutcome> {
        let file = self.file.as_mut().ok_or(ProcessError::ClosedChannel)?;
        let mut buf = vec![0u8; max.clamp(1, MAX_READ_CHUNK)];
        loop {
            match file.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::EndOfStream),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(ReadOutcome::Data(buf));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read until end of stream and return everything.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let file = self.file.as_mut().ok_or(ProcessError::ClosedChannel)?;
        let mut out = Vec::new();
        file.read_to_end(&mut out)?;
        Ok(out)
    }

    /// One write call; returns how many bytes the OS accepted.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(ProcessError::ClosedChannel)?;
        loop {
            match file.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write the whole buffer or fail.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(ProcessError::ClosedChannel)?;
        file.write_all(data)?;
        Ok(())
    }

    /// Release the descriptor. Safe to call any number of times.
    pub fn close(&mut self) -> CloseStatus {
        match self.file.take() {
            Some(file) => {
                trace!(channel = self.name, fd = file.as_raw_fd(), "closing channel");
                drop(file);
                CloseStatus::Closed
            }
            None => {
                debug!(channel = self.name, "close on already closed channel");
                CloseStatus::AlreadyClosed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_pair() -> (ByteChannel, ByteChannel) {
        let (r, w) = nix::unistd::pipe().unwrap();
        (
            ByteChannel::from_owned_fd(r, "read"),
            ByteChannel::from_owned_fd(w, "write"),
        )
    }

    #[test]
    fn test_write_then_read() {
        let (mut reader, mut writer) = channel_pair();
        writer.write_all(b"hello").unwrap();
        assert_eq!(writer.close(), CloseStatus::Closed);

        assert_eq!(
            reader.read(4096).unwrap(),
            ReadOutcome::Data(b"hello".to_vec())
        );
        assert_eq!(reader.read(4096).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_read_respects_max() {
        let (mut reader, mut writer) = channel_pair();
        writer.write_all(b"abcdef").unwrap();
        drop(writer);

        assert_eq!(reader.read(4).unwrap(), ReadOutcome::Data(b"abcd".to_vec()));
        assert_eq!(reader.read_to_end().unwrap(), b"ef".to_vec());
    }

    #[test]
    fn test_oversized_read_is_capped() {
        let (mut reader, mut writer) = channel_pair();
        writer.write_all(b"small").unwrap();
        drop(writer);

        assert_eq!(
            reader.read(usize::MAX).unwrap(),
            ReadOutcome::Data(b"small".to_vec())
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut reader, _writer) = channel_pair();
        assert!(!reader.is_closed());
        assert_eq!(reader.close(), CloseStatus::Closed);
        assert_eq!(reader.close(), CloseStatus::AlreadyClosed);
        assert_eq!(reader.close(), CloseStatus::AlreadyClosed);
        assert!(reader.is_closed());
        assert!(reader.raw_fd().is_none());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (mut reader, mut writer) = channel_pair();
        reader.close();
        writer.close();

        assert!(matches!(reader.read(16), Err(ProcessError::ClosedChannel)));
        assert!(matches!(reader.read_to_end(), Err(ProcessError::ClosedChannel)));
        assert!(matches!(writer.write(b"x"), Err(ProcessError::ClosedChannel)));
        assert!(matches!(
            writer.write_all(b"x"),
            Err(ProcessError::ClosedChannel)
        ));
    }

    #[test]
    fn test_write_to_closed_reader_fails() {
        let (reader, mut writer) = channel_pair();
        drop(reader);
        // Rust ignores SIGPIPE, so the write surfaces as EPIPE.
        let err = writer.write_all(b"nobody listening").unwrap_err();
        assert!(matches!(err, ProcessError::Io(_)));
    }
}
