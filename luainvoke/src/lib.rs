//! Embed Lua component scripts and invoke them with `-n`/`-p`/`-a`/`-l`
//! style interpreter switches.
//!
//! A [`ScriptInvoker`] assembles a script from required libraries and a main
//! source, configures an interpreter (`-n -p -a -l -d -W#`, load paths,
//! input bindings), binds host byte sinks as the script's standard streams,
//! evaluates it, and turns however it ended into a [`ScriptValue`]:
//!
//! ```no_run
//! use luainvoke::{ScriptInvoker, ScriptValue};
//!
//! let mut invoker = ScriptInvoker::from_source("return INPUTS.name:upper()");
//! invoker.input_value("name", "world");
//! let value = invoker.invoke().unwrap();
//! assert_eq!(value, ScriptValue::Str("WORLD".into()));
//! ```

pub mod assemble;
pub mod cli;
pub mod config;
pub mod configure;
pub mod embedded;
pub mod engine;
pub mod error;
pub mod globals;
pub mod handle;
pub mod invoker;
pub mod realm;
pub mod redirect;
pub mod signal;
pub mod value;

pub use engine::{EngineError, EngineRegistry, LuaEngine, ScriptEngine};
pub use error::{BindingError, InvokeError, Result};
pub use handle::{HandleId, InterpreterHandle, Ownership};
pub use invoker::ScriptInvoker;
pub use realm::{ComponentDescriptor, DirRealm, MemoryRealm, ResourceRealm};
pub use redirect::{Capture, HostStream};
pub use signal::{ControlSignal, HostFault};
pub use value::{Fault, FaultKind, HostFunction, ScriptValue};
