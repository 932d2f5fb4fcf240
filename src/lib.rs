//! Process primitives for an embedded scripting runtime.
//!
//! This crate exposes a handful of POSIX facilities in a form a script host can
//! call through a small, value-based boundary: terminating the process,
//! reading the working directory, one-directional pipes to a shell command,
//! and spawning a program with all three standard streams redirected.
//!
//! The core is synchronous and single-owner. Every OS handle belongs to exactly
//! one object and is released exactly once, on `close` or on drop, and no
//! operation that fails leaves a descriptor behind. The [`Bindings`] type is
//! the registration object a runtime creates at setup; it maps named
//! functions, the `Pipe` constructor and object methods onto the modules
//! below. Unix only.

pub mod argv;
pub mod bindings;
pub mod channel;
pub mod config;
pub mod error;
pub mod process_control;
pub mod shell_pipe;
pub mod spawn;
pub mod value;

pub use argv::{Argv, build_argv};
pub use bindings::{Bindings, Export, ExportStyle, FunctionFactory, HostContext, HostFunction};
pub use channel::{ByteChannel, CloseStatus, ReadOutcome};
pub use config::Config;
pub use error::{ProcessError, Result};
pub use process_control::{current_directory, exit};
pub use shell_pipe::{PipeMode, ShellPipe};
pub use spawn::{ExitStatus, Subprocess, spawn, spawn_value, spawn_with, wait_pid};
pub use value::{Handle, Value};
