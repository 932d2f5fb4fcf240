//! Conversion of caller-supplied argument lists into `execvp` form.

use crate::error::{ProcessError, Result};
use crate::value::Value;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Owned argument vector for a process-execution call.
///
/// Each argument is an independent copy. The pointer array handed to `execvp`
/// borrows from this value, so everything is released once, when the `Argv`
/// is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argv {
    args: Vec<CString>,
}

impl Argv {
    /// Build an argv from Rust strings.
    ///
    /// Fails with [`ProcessError::InvalidArgument`] if an argument contains a
    /// NUL byte.
    pub fn new<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .enumerate()
            .map(|(i, arg)| to_cstring(i, arg.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { args })
    }

    /// Build an argv from a runtime value, which must be an array of strings.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(ProcessError::invalid(format!(
                "argv must be an array, got {}",
                value.type_name()
            )));
        };
        let args = items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Str(s) => to_cstring(i, s),
                other => Err(ProcessError::invalid(format!(
                    "argv[{i}] must be a string, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { args })
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The program to execute, conventionally `argv[0]`.
    pub fn program(&self) -> Option<&CStr> {
        self.args.first().map(CString::as_c_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.args.iter().map(CString::as_c_str)
    }

    /// NULL-terminated pointer array, `len() + 1` entries long.
    ///
    /// The pointers stay valid for as long as `self` is alive and unmodified.
    pub fn as_ptrs(&self) -> Vec<*const c_char> {
        self.args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect()
    }
}

/// Convert a runtime value into an owned argv. See [`Argv::from_value`].
pub fn build_argv(value: &Value) -> Result<Argv> {
    Argv::from_value(value)
}

fn to_cstring(index: usize, arg: &str) -> Result<CString> {
    CString::new(arg)
        .map_err(|_| ProcessError::invalid(format!("argv[{index}] contains a NUL byte")))
}
