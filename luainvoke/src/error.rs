//! Error taxonomy for the invocation boundary.
//!
//! Only [`InvokeError::UnclassifiedControlSignal`] carries an interpreter
//! error out unchanged; every fault a script can raise on purpose is turned
//! into a result value by [`crate::signal`] instead.

use thiserror::Error;

/// Errors surfaced to the host by [`crate::ScriptInvoker`].
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Every lookup in the fallback chain came up empty.
    #[error("{}", not_found_message(.name, .searched))]
    ResourceNotFound { name: String, searched: Vec<String> },

    /// Neither a script reader nor a resolvable component descriptor.
    #[error("no script source: set a reader, or construct the invoker from a component descriptor and resource realm")]
    MissingScriptSource,

    /// The host tried to assign an unusable value to a stream global.
    #[error(transparent)]
    StreamBinding(#[from] BindingError),

    /// An interpreter signal the boundary does not know how to classify.
    #[error("unclassified control signal: {0}")]
    UnclassifiedControlSignal(mlua::Error),

    /// Preparing the interpreter (globals, streams, load path) failed.
    #[error("interpreter setup failed: {0}")]
    Setup(#[source] mlua::Error),

    #[error("I/O error reading {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid field separator: {0}")]
    InvalidFieldSeparator(#[from] regex::Error),

    /// The selected script engine could not be used at all.
    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),
}

impl From<mlua::Error> for InvokeError {
    fn from(err: mlua::Error) -> Self {
        InvokeError::Setup(err)
    }
}

fn not_found_message(name: &str, searched: &[String]) -> String {
    let mut buf = format!("cannot find: {name}");
    if !searched.is_empty() {
        buf.push_str(" in:");
        for (i, location) in searched.iter().enumerate() {
            buf.push_str(&format!("\n   [{i}]  {location}"));
        }
    }
    buf
}

/// A rejected write to a validated global.
///
/// Raised inside the interpreter when the script assigns, and returned
/// directly when the host assigns through
/// [`crate::InterpreterHandle::assign_global`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The new value wraps a closed resource (an I/O error).
    #[error("{name} is not opened for writing")]
    Closed { name: String },

    /// The new value has no `write` capability (a type error).
    #[error("{name} must have write method, {given} given")]
    NotWritable { name: String, given: String },

    #[error("{name} is a read-only variable")]
    ReadOnly { name: String },

    #[error("{name} must be a {expected}, {given} given")]
    TypeMismatch { name: String, expected: String, given: String },
}

impl BindingError {
    /// `true` for the stream-specific rejections.
    pub fn is_stream_error(&self) -> bool {
        matches!(self, BindingError::Closed { .. } | BindingError::NotWritable { .. })
    }

    /// `true` when the rejection is an I/O error rather than a type error.
    pub fn is_io_error(&self) -> bool {
        matches!(self, BindingError::Closed { .. })
    }
}

pub type Result<T> = std::result::Result<T, InvokeError>;
