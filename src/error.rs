use thiserror::Error;

/// Errors reported by the process primitives.
///
/// Every operation surfaces its failure synchronously to the immediate caller;
/// nothing here is retried internally.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Malformed input: wrong value type, bad pipe mode, non-string argv element.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An OS resource call failed (pipe, fork, getcwd, waitpid).
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: nix::Error,
    },

    /// The command interpreter could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The channel or pipe was already closed.
    #[error("channel is closed")]
    ClosedChannel,

    /// Read or write on an open stream failed, including short writes.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub(crate) fn os(op: &'static str) -> impl FnOnce(nix::Error) -> Self {
        move |source| ProcessError::Os { op, source }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ProcessError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
