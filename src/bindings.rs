//! The call boundary between an embedding runtime and the process primitives.
//!
//! A [`Bindings`] value is created once per runtime instance and owns every
//! Pipe and Channel object that runtime has created. Several instances can
//! live side by side; they share no state.

use crate::channel::{ByteChannel, CloseStatus, ReadOutcome};
use crate::config::Config;
use crate::error::ProcessError;
use crate::process_control;
use crate::shell_pipe::ShellPipe;
use crate::spawn;
use crate::value::{Handle, Value};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Name of the pipe constructor in every export style.
pub const PIPE_CONSTRUCTOR: &str = "Pipe";

/// How the primitives are presented to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStyle {
    /// Installed into the global scope: `process.exit`, `Pipe`, and a
    /// `dirname` string captured at setup time.
    Global,
    /// Exported from a loadable module: `exit`, `dirname`,
    /// `currentDirectory`, `spawn`, `wait`, and `Pipe`.
    Module,
}

impl ExportStyle {
    /// `(exported name, canonical function name)` pairs for this style.
    fn function_names(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ExportStyle::Global => &[("process.exit", "exit")],
            ExportStyle::Module => &[
                ("exit", "exit"),
                ("dirname", "currentDirectory"),
                ("currentDirectory", "currentDirectory"),
                ("spawn", "spawn"),
                ("wait", "wait"),
            ],
        }
    }
}

/// One entry a runtime should install when setting up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    Function(String),
    Constructor(&'static str),
    Value(&'static str, Value),
}

/// A primitive callable by name from the runtime.
pub trait HostFunction {
    fn call(&self, args: &[Value], ctx: &mut HostContext<'_>) -> Result<Value>;
}

/// Built-in functions known at compile time.
pub(crate) trait BuiltinFunction: HostFunction + Default + 'static {
    /// Canonical name, as used by [`ExportStyle::function_names`].
    fn name() -> &'static str;
}

/// Factory that creates a function for a canonical name, or `None` if the
/// name is not its own.
pub trait FunctionFactory {
    fn name(&self) -> &str;

    fn try_create(&self, name: &str) -> Option<Box<dyn HostFunction>>;
}

/// Factory for the functions defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinFunction> FunctionFactory for Factory<T> {
    fn name(&self) -> &str {
        T::name()
    }

    fn try_create(&self, name: &str) -> Option<Box<dyn HostFunction>> {
        (name == T::name()).then(|| Box::new(T::default()) as Box<dyn HostFunction>)
    }
}

/// A live object reachable through a [`Handle`].
#[derive(Debug)]
pub enum Object {
    Pipe(ShellPipe),
    Channel(ByteChannel),
}

impl Object {
    fn kind(&self) -> &'static str {
        match self {
            Object::Pipe(_) => "Pipe",
            Object::Channel(_) => "Channel",
        }
    }
}

/// Handle table of one runtime instance.
#[derive(Debug, Default)]
pub struct ObjectTable {
    next: u64,
    objects: HashMap<Handle, Object>,
}

impl ObjectTable {
    pub fn insert(&mut self, object: Object) -> Handle {
        self.next += 1;
        let handle = Handle(self.next);
        self.objects.insert(handle, object);
        handle
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Object> {
        self.objects.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Object> {
        self.objects.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// What a host function may touch while it runs.
pub struct HostContext<'a> {
    pub config: &'a Config,
    pub objects: &'a mut ObjectTable,
}

/// Registration object for one runtime instance.
///
/// ```
/// use process_primitives::{Bindings, ExportStyle, Value};
///
/// let mut bindings = Bindings::new(ExportStyle::Module);
/// let pipe = bindings
///     .construct("Pipe", &[Value::from("echo hi"), Value::from("r")])
///     .unwrap();
/// let pipe = pipe.as_handle().unwrap();
/// let data = bindings.call_method(pipe, "read", &[]).unwrap();
/// assert_eq!(data, Value::Bytes(b"hi\n".to_vec()));
/// let status = bindings.call_method(pipe, "close", &[]).unwrap();
/// assert_eq!(status, Value::Int(0));
/// bindings.finalize(pipe);
/// ```
pub struct Bindings {
    style: ExportStyle,
    config: Config,
    builtins: Vec<Box<dyn FunctionFactory>>,
    registered: Vec<Box<dyn FunctionFactory>>,
    globals: Vec<(&'static str, Value)>,
    objects: ObjectTable,
}

impl Bindings {
    /// Bindings with the default configuration.
    pub fn new(style: ExportStyle) -> Self {
        Self::with_config(style, Config::default())
    }

    pub fn with_config(style: ExportStyle, config: Config) -> Self {
        let mut globals = Vec::new();
        if style == ExportStyle::Global {
            match process_control::current_directory() {
                Ok(cwd) => globals.push(("dirname", Value::Str(cwd.to_string_lossy().into_owned()))),
                Err(e) => warn!(error = %e, "dirname not installed"),
            }
        }
        Self {
            style,
            config,
            builtins: vec![
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<CurrentDirectory>::default()),
                Box::new(Factory::<Spawn>::default()),
                Box::new(Factory::<Wait>::default()),
            ],
            registered: Vec::new(),
            globals,
            objects: ObjectTable::default(),
        }
    }

    /// Add a function of the embedder's own. It is exported under its own
    /// name in every style and takes precedence over the built-ins.
    pub fn register(&mut self, factory: Box<dyn FunctionFactory>) {
        self.registered.push(factory);
    }

    pub fn style(&self) -> ExportStyle {
        self.style
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Everything the runtime should install for this style.
    pub fn exports(&self) -> Vec<Export> {
        let mut exports: Vec<Export> = self
            .style
            .function_names()
            .iter()
            .map(|(exported, _)| Export::Function(exported.to_string()))
            .collect();
        exports.extend(
            self.registered
                .iter()
                .map(|f| Export::Function(f.name().to_string())),
        );
        exports.push(Export::Constructor(PIPE_CONSTRUCTOR));
        exports.extend(
            self.globals
                .iter()
                .map(|(name, value)| Export::Value(*name, value.clone())),
        );
        exports
    }

    fn resolve(&self, name: &str) -> Option<Box<dyn HostFunction>> {
        if let Some(function) = self.registered.iter().find_map(|f| f.try_create(name)) {
            return Some(function);
        }
        let (_, canonical) = self
            .style
            .function_names()
            .iter()
            .find(|(exported, _)| *exported == name)?;
        self.builtins.iter().find_map(|f| f.try_create(canonical))
    }

    /// Call an exported function by name.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self
            .resolve(name)
            .ok_or_else(|| ProcessError::invalid(format!("no such function: {name}")))?;

        let mut ctx = HostContext {
            config: &self.config,
            objects: &mut self.objects,
        };
        function.call(args, &mut ctx)
    }

    /// Run a constructor; only [`PIPE_CONSTRUCTOR`] exists.
    pub fn construct(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        if name != PIPE_CONSTRUCTOR {
            return Err(ProcessError::invalid(format!("no such constructor: {name}")).into());
        }
        let command = string_arg(args, 0, "command")?;
        let mode = string_arg(args, 1, "mode")?;
        let pipe = ShellPipe::open_with(&self.config, command, mode)
            .with_context(|| format!("Pipe({command:?}, {mode:?})"))?;
        Ok(Value::Handle(self.objects.insert(Object::Pipe(pipe))))
    }

    /// Call `read`, `write` or `close` on a live object.
    pub fn call_method(&mut self, handle: Handle, method: &str, args: &[Value]) -> Result<Value> {
        let read_chunk = self.config.read_chunk;
        let object = self
            .objects
            .get_mut(handle)
            .ok_or_else(|| ProcessError::invalid(format!("no such object: {handle}")))?;
        let kind = object.kind();

        match (object, method) {
            (Object::Pipe(pipe), "read") => Ok(read_value(pipe.read()?)),
            (Object::Pipe(pipe), "write") => {
                pipe.write(bytes_arg(args, 0)?)?;
                Ok(Value::Undefined)
            }
            (Object::Pipe(pipe), "close") => Ok(Value::Int(pipe.close()?.into())),
            (Object::Channel(channel), "read") => Ok(read_value(channel.read(read_chunk)?)),
            (Object::Channel(channel), "write") => {
                channel.write_all(bytes_arg(args, 0)?)?;
                Ok(Value::Undefined)
            }
            (Object::Channel(channel), "close") => {
                Ok(Value::Bool(channel.close() == CloseStatus::Closed))
            }
            (_, other) => Err(ProcessError::invalid(format!("{kind} has no method {other}")).into()),
        }
    }

    /// Finalizer hook: release the object behind `handle`.
    ///
    /// Returns `false` if the handle was unknown or already finalized.
    /// Objects that were closed explicitly are not released a second time.
    pub fn finalize(&mut self, handle: Handle) -> bool {
        match self.objects.remove(handle) {
            Some(object) => {
                debug!(%handle, kind = object.kind(), "finalizing object");
                true
            }
            None => false,
        }
    }
}

fn read_value(outcome: ReadOutcome) -> Value {
    match outcome {
        ReadOutcome::Data(bytes) => Value::Bytes(bytes),
        ReadOutcome::EndOfStream => Value::Undefined,
    }
}

fn string_arg<'v>(args: &'v [Value], index: usize, what: &str) -> Result<&'v str, ProcessError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(ProcessError::invalid(format!(
            "{what} must be a string, got {}",
            other.type_name()
        ))),
        None => Err(ProcessError::invalid(format!("missing {what}"))),
    }
}

fn bytes_arg(args: &[Value], index: usize) -> Result<&[u8], ProcessError> {
    match args.get(index) {
        Some(Value::Bytes(b)) => Ok(b),
        Some(other) => Err(ProcessError::invalid(format!(
            "data must be bytes, got {}",
            other.type_name()
        ))),
        None => Err(ProcessError::invalid("missing data")),
    }
}

#[derive(Default)]
struct Exit;

impl BuiltinFunction for Exit {
    fn name() -> &'static str {
        "exit"
    }
}

impl HostFunction for Exit {
    fn call(&self, args: &[Value], _ctx: &mut HostContext<'_>) -> Result<Value> {
        let code = match args.first() {
            None | Some(Value::Undefined) => None,
            Some(Value::Int(code)) => Some(
                i32::try_from(*code)
                    .map_err(|_| ProcessError::invalid(format!("exit code {code} out of range")))?,
            ),
            Some(other) => {
                return Err(ProcessError::invalid(format!(
                    "exit code must be an int, got {}",
                    other.type_name()
                ))
                .into());
            }
        };
        process_control::exit(code)
    }
}

#[derive(Default)]
struct CurrentDirectory;

impl BuiltinFunction for CurrentDirectory {
    fn name() -> &'static str {
        "currentDirectory"
    }
}

impl HostFunction for CurrentDirectory {
    fn call(&self, _args: &[Value], _ctx: &mut HostContext<'_>) -> Result<Value> {
        let cwd = process_control::current_directory()?;
        Ok(Value::Str(cwd.to_string_lossy().into_owned()))
    }
}

/// `spawn(argv)` → `[stdin, stdout, stderr, pid]`.
#[derive(Default)]
struct Spawn;

impl BuiltinFunction for Spawn {
    fn name() -> &'static str {
        "spawn"
    }
}

impl HostFunction for Spawn {
    fn call(&self, args: &[Value], ctx: &mut HostContext<'_>) -> Result<Value> {
        let argv = args.first().unwrap_or(&Value::Undefined);
        let (stdin, stdout, stderr, pid) = spawn::spawn_value(ctx.config, argv)?.into_parts();
        Ok(Value::Array(vec![
            Value::Handle(ctx.objects.insert(Object::Channel(stdin))),
            Value::Handle(ctx.objects.insert(Object::Channel(stdout))),
            Value::Handle(ctx.objects.insert(Object::Channel(stderr))),
            Value::Int(pid.into()),
        ]))
    }
}

/// `wait(pid)` → shell-style exit status of a spawned child.
#[derive(Default)]
struct Wait;

impl BuiltinFunction for Wait {
    fn name() -> &'static str {
        "wait"
    }
}

impl HostFunction for Wait {
    fn call(&self, args: &[Value], _ctx: &mut HostContext<'_>) -> Result<Value> {
        let pid = args
            .first()
            .and_then(Value::as_int)
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| ProcessError::invalid("wait expects a pid"))?;
        let status = spawn::wait_pid(pid)?;
        Ok(Value::Int(status.code().into()))
    }
}
