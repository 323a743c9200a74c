//! Control-flow translation.
//!
//! Every evaluation ends in exactly one [`ControlSignal`]:
//!
//! | Interpreter outcome                                   | Signal         | Host sees            |
//! |-------------------------------------------------------|----------------|----------------------|
//! | chunk returned                                        | `NormalValue`  | first value, or nil  |
//! | `exit(n)` / `os.exit(n)`                              | `ExitSignal`   | `Int(n)`             |
//! | runtime, syntax, argument or binding error; `HostFault` | `RaisedFault` | `Fault` value        |
//! | anything else                                         | `Unclassified` | `Err(..)`, unchanged |
//!
//! `exit` is implemented as an error carrying [`ExitRequest`], so it unwinds
//! through nested Lua and host frames the same way a raised fault does.

use mlua::{Error, Function, Lua, MultiValue, Value};
use thiserror::Error as ThisError;

use crate::error::{BindingError, InvokeError, Result};
use crate::value::{Fault, FaultKind, ScriptValue};

/// Raised by `exit`; carries the requested status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[error("exit {status}")]
pub struct ExitRequest {
    pub status: i64,
}

/// Return this from a host callback to raise an ordinary script fault.
/// Any other host error type ends the invocation as unclassified.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{0}")]
pub struct HostFault(pub String);

impl HostFault {
    pub fn new(message: impl Into<String>) -> Self {
        HostFault(message.into())
    }
}

/// How an evaluation ended.
#[derive(Debug)]
pub enum ControlSignal {
    NormalValue(ScriptValue),
    ExitSignal(i64),
    RaisedFault(Fault),
    Unclassified(Error),
}

impl ControlSignal {
    /// The host-facing result.  Only `Unclassified` becomes an error.
    pub fn into_value(self) -> Result<ScriptValue> {
        match self {
            ControlSignal::NormalValue(value) => Ok(value),
            ControlSignal::ExitSignal(status) => Ok(ScriptValue::Int(status)),
            ControlSignal::RaisedFault(fault) => Ok(ScriptValue::Fault(fault)),
            ControlSignal::Unclassified(err) => Err(InvokeError::UnclassifiedControlSignal(err)),
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ControlSignal::RaisedFault(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn exit_status(&self) -> Option<i64> {
        match self {
            ControlSignal::ExitSignal(status) => Some(*status),
            _ => None,
        }
    }
}

/// Classify the outcome of calling the top-level chunk.
pub fn classify(outcome: mlua::Result<MultiValue>) -> ControlSignal {
    match outcome {
        Ok(values) => ControlSignal::NormalValue(ScriptValue::from_multi(values)),
        Err(err) => classify_error(err),
    }
}

pub fn classify_error(err: Error) -> ControlSignal {
    if let Some(status) = requested_exit(&err) {
        tracing::debug!(status, "script requested exit");
        return ControlSignal::ExitSignal(status);
    }
    match fault_from_error(&err) {
        Some(fault) => ControlSignal::RaisedFault(fault),
        None => ControlSignal::Unclassified(err),
    }
}

fn requested_exit(err: &Error) -> Option<i64> {
    match err {
        Error::CallbackError { cause, .. } | Error::WithContext { cause, .. } => requested_exit(cause),
        Error::ExternalError(e) => e.downcast_ref::<ExitRequest>().map(|r| r.status),
        _ => None,
    }
}

/// The fault a script-visible error represents, or `None` if the error is
/// not one a script raises on purpose.
pub fn fault_from_error(err: &Error) -> Option<Fault> {
    match err {
        Error::CallbackError { traceback, cause } => fault_from_error(cause).map(|fault| {
            if fault.traceback.is_none() && !traceback.is_empty() {
                fault.with_traceback(traceback.clone())
            } else {
                fault
            }
        }),
        Error::WithContext { cause, .. } => fault_from_error(cause),
        Error::RuntimeError(msg) => Some(split_traceback(FaultKind::Runtime, msg)),
        Error::SyntaxError { message, .. } => Some(Fault::new(FaultKind::Syntax, message.clone())),
        Error::ExternalError(e) => {
            if let Some(binding) = e.downcast_ref::<BindingError>() {
                let kind = if binding.is_stream_error() { FaultKind::Stream } else { FaultKind::Runtime };
                Some(Fault::new(kind, binding.to_string()))
            } else {
                e.downcast_ref::<HostFault>().map(|h| Fault::new(FaultKind::Host, h.0.clone()))
            }
        }
        Error::BadArgument { .. }
        | Error::FromLuaConversionError { .. }
        | Error::ToLuaConversionError { .. }
        | Error::MetaMethodTypeError { .. }
        | Error::UserDataTypeMismatch
        | Error::UserDataBorrowError
        | Error::UserDataBorrowMutError => Some(Fault::new(FaultKind::Runtime, err.to_string())),
        _ => None,
    }
}

/// Lua's message handler appends `stack traceback:` to string errors.
fn split_traceback(kind: FaultKind, msg: &str) -> Fault {
    match msg.split_once("\nstack traceback:") {
        Some((message, rest)) => {
            Fault::new(kind, message).with_traceback(format!("stack traceback:{rest}"))
        }
        None => Fault::new(kind, msg),
    }
}

// ── exit ──────────────────────────────────────────────────────────────────────

/// `exit([status])`: none or `true` → 0, `false` → 1, integral number → itself.
pub fn exit_function(lua: &Lua, fname: &'static str) -> mlua::Result<Function> {
    lua.create_function(move |_, args: MultiValue| -> mlua::Result<()> {
        let status = exit_status(args.iter().next().unwrap_or(&Value::Nil), fname)?;
        Err(Error::external(ExitRequest { status }))
    })
}

fn exit_status(value: &Value, fname: &str) -> mlua::Result<i64> {
    match value {
        Value::Nil | Value::Boolean(true) => Ok(0),
        Value::Boolean(false) => Ok(1),
        Value::Integer(n) => Ok(*n),
        Value::Number(f) if f.is_finite() && f.fract() == 0.0 => Ok(*f as i64),
        other => Err(Error::RuntimeError(format!(
            "bad argument #1 to '{fname}' (integer or boolean expected, got {})",
            other.type_name()
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
