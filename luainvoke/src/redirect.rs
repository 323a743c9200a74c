//! Stream redirection.
//!
//! Host byte sinks are wrapped as [`HostStream`] userdata and bound to the
//! interpreter's standard stream globals:
//!
//! | Global                 | Refers to          | Access                         |
//! |------------------------|--------------------|--------------------------------|
//! | `stdout`, `defout`     | host output sink   | stream-validated               |
//! | `stderr`, `deferr`     | host error sink    | stream-validated               |
//! | `STDOUT`, `STDERR`     | the same objects   | read-only                      |
//! | `io.stdout`, `io.stderr` | the same objects | plain table fields             |
//!
//! `print` and `io.write` are replaced so that they write to whatever
//! `stdout` currently refers to.  A stream global only accepts a value that
//! is open and exposes `write`; see [`stream_validator`].
//!
//! The host input reader is bound here too: `gets()` reads one line into
//! `LINE`, and the implicit `-n` loop reads from the same [`InputSource`].

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use mlua::{AnyUserData, Function, Lua, MetaMethod, MultiValue, Table, UserData, UserDataMethods, Value};

use crate::error::BindingError;
use crate::globals::{self, GlobalBindingSet, Validator};

const HELPERS: &str = r#"
local pcall, io_type = pcall, io and io.type
local function inspect(v)
  local ok, w = pcall(function() return v.write end)
  local closed = io_type ~= nil and io_type(v) == "closed file"
  return ok and w ~= nil, closed
end
local function write_via(target, text)
  target:write(text)
end
return inspect, write_via, tostring
"#;

type SharedSink = Rc<RefCell<Option<Box<dyn Write>>>>;

// ── HostStream ────────────────────────────────────────────────────────────────

/// A host byte sink visible to scripts as a stream object.
///
/// Clones share the sink, so closing one closes them all.
#[derive(Clone)]
pub struct HostStream {
    label: String,
    sink: SharedSink,
}

impl HostStream {
    pub fn new(label: impl Into<String>, sink: impl Write + 'static) -> Self {
        Self::from_boxed(label, Box::new(sink))
    }

    pub fn from_boxed(label: impl Into<String>, sink: Box<dyn Write>) -> Self {
        Self { label: label.into(), sink: Rc::new(RefCell::new(Some(sink))) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_open(&self) -> bool {
        self.sink.borrow().is_some()
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        match self.sink.borrow_mut().as_mut() {
            Some(sink) => sink.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "not opened for writing")),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.sink.borrow_mut().as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }

    /// Flush and release the sink.  Closing twice is a no-op.
    pub fn close(&self) -> io::Result<()> {
        let taken = self.sink.borrow_mut().take();
        match taken {
            Some(mut sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

fn closed_error(label: &str) -> mlua::Error {
    mlua::Error::RuntimeError(format!("{label}: not opened for writing"))
}

/// Bytes for one `write` argument: strings as-is, numbers via `tostring`.
fn write_arg(tostring: &Function, arg: &Value, pos: usize, fname: &str) -> mlua::Result<Vec<u8>> {
    match arg {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Integer(_) | Value::Number(_) => {
            let s: mlua::String = tostring.call(arg.clone())?;
            Ok(s.as_bytes().to_vec())
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "bad argument #{pos} to '{fname}' (string expected, got {})",
            other.type_name()
        ))),
    }
}

impl UserData for HostStream {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // stream:write(...) → stream
        methods.add_function("write", |lua, (ud, args): (AnyUserData, MultiValue)| {
            {
                let this = ud.borrow::<HostStream>()?;
                let tostring: Function = lua.globals().get("tostring")?;
                for (i, arg) in args.iter().enumerate() {
                    let bytes = write_arg(&tostring, arg, i + 1, "write")?;
                    this.write_bytes(&bytes).map_err(|_| closed_error(&this.label))?;
                }
            }
            Ok(ud)
        });

        methods.add_method("flush", |_, this, ()| {
            this.flush().map_err(mlua::Error::external)?;
            Ok(true)
        });

        methods.add_method("close", |_, this, ()| {
            this.close().map_err(mlua::Error::external)?;
            Ok(true)
        });

        methods.add_method("closed", |_, this, ()| Ok(!this.is_open()));

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let state = if this.is_open() { "" } else { " (closed)" };
            Ok(format!("<stream {}{state}>", this.label))
        });
    }
}

// ── Capture ───────────────────────────────────────────────────────────────────

/// An in-memory sink whose clones share one buffer.  Hand one clone to an
/// invocation and keep the other to read what the script wrote.
#[derive(Debug, Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Helpers & validation ──────────────────────────────────────────────────────

struct StreamHelpers {
    inspect: Function,
    write_via: Function,
    tostring: Function,
}

impl StreamHelpers {
    fn load(lua: &Lua) -> mlua::Result<Self> {
        let (inspect, write_via, tostring): (Function, Function, Function) =
            lua.load(HELPERS).set_name("=stream-helpers").eval()?;
        Ok(Self { inspect, write_via, tostring })
    }

    /// Write `bytes` to whatever `target` is: a host stream directly,
    /// anything else through its `write` method.
    fn write_to(&self, lua: &Lua, target: &Value, bytes: &[u8]) -> mlua::Result<()> {
        if let Value::UserData(ud) = target {
            if let Ok(stream) = ud.borrow::<HostStream>() {
                return stream.write_bytes(bytes).map_err(|_| closed_error(&stream.label));
            }
        }
        self.write_via.call::<()>((target.clone(), lua.create_string(bytes)?))
    }
}

/// The check applied when a stream global is reassigned.
///
/// Identical value → accepted.  Closed host stream or closed Lua file →
/// [`BindingError::Closed`].  No `write` → [`BindingError::NotWritable`].
fn stream_validator(helpers: Rc<StreamHelpers>) -> Validator {
    Rc::new(move |_: &Lua, name: &str, new: &Value, current: &Value| {
        if new == current {
            return Ok(());
        }
        if let Value::UserData(ud) = new {
            if let Ok(stream) = ud.borrow::<HostStream>() {
                return if stream.is_open() {
                    Ok(())
                } else {
                    Err(BindingError::Closed { name: name.to_owned() })
                };
            }
        }
        let (writable, closed): (bool, bool) = helpers.inspect.call(new.clone()).unwrap_or((false, false));
        if closed {
            Err(BindingError::Closed { name: name.to_owned() })
        } else if !writable {
            Err(BindingError::NotWritable { name: name.to_owned(), given: new.type_name().to_owned() })
        } else {
            Ok(())
        }
    })
}

// ── Binding ───────────────────────────────────────────────────────────────────

/// The standard streams bound for one invocation.
pub struct StandardStreams {
    pub out: HostStream,
    pub err: HostStream,
    helpers: Rc<StreamHelpers>,
}

impl StandardStreams {
    /// Write to whatever the stream global `name` refers to right now,
    /// falling back to the host sink if that fails.
    pub fn write_global(&self, lua: &Lua, set: &RefCell<GlobalBindingSet>, name: &str, bytes: &[u8]) {
        let fallback = if name == "stdout" { &self.out } else { &self.err };
        let routed = GlobalBindingSet::read(set, lua, name)
            .and_then(|target| self.helpers.write_to(lua, &target.unwrap_or(Value::Nil), bytes));
        if let Err(e) = routed {
            tracing::debug!(global = name, error = %e, "stream global unusable, writing to host sink");
            let _ = fallback.write_bytes(bytes);
        }
    }

    pub fn flush(&self) {
        let _ = self.out.flush();
        let _ = self.err.flush();
    }
}

/// Bind `out` and `err` as the interpreter's standard streams.
pub fn bind_streams(
    lua: &Lua,
    set: &Rc<RefCell<GlobalBindingSet>>,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
) -> mlua::Result<StandardStreams> {
    let helpers = Rc::new(StreamHelpers::load(lua)?);
    let out = HostStream::from_boxed("stdout", out);
    let err = HostStream::from_boxed("stderr", err);
    let out_ud = Value::UserData(lua.create_userdata(out.clone())?);
    let err_ud = Value::UserData(lua.create_userdata(err.clone())?);

    {
        let validator = stream_validator(Rc::clone(&helpers));
        let mut bindings = set.borrow_mut();
        for name in ["stdout", "defout"] {
            bindings.define_validated(name, out_ud.clone(), Rc::clone(&validator));
        }
        for name in ["stderr", "deferr"] {
            bindings.define_validated(name, err_ud.clone(), Rc::clone(&validator));
        }
        bindings.define_readonly("STDOUT", out_ud.clone());
        bindings.define_readonly("STDERR", err_ud.clone());
    }
    globals::unshadow(lua, &set.borrow())?;

    let print = {
        let set = Rc::clone(set);
        let helpers = Rc::clone(&helpers);
        lua.create_function(move |lua, args: MultiValue| {
            let mut line = Vec::new();
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    line.push(b'\t');
                }
                let s: mlua::String = helpers.tostring.call(arg.clone())?;
                line.extend_from_slice(&s.as_bytes());
            }
            line.push(b'\n');
            let target = GlobalBindingSet::read(&set, lua, "stdout")?.unwrap_or(Value::Nil);
            helpers.write_to(lua, &target, &line)
        })?
    };
    lua.globals().raw_set("print", print)?;

    let io_write = {
        let set = Rc::clone(set);
        let helpers = Rc::clone(&helpers);
        lua.create_function(move |lua, args: MultiValue| {
            let target = GlobalBindingSet::read(&set, lua, "stdout")?.unwrap_or(Value::Nil);
            for (i, arg) in args.iter().enumerate() {
                let bytes = write_arg(&helpers.tostring, arg, i + 1, "write")?;
                helpers.write_to(lua, &target, &bytes)?;
            }
            Ok(target)
        })?
    };

    let io: Option<Table> = lua.globals().get("io")?;
    if let Some(io) = io {
        io.set("stdout", out_ud)?;
        io.set("stderr", err_ud)?;
        io.set("write", io_write)?;
    }

    Ok(StandardStreams { out, err, helpers })
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// The host reader behind `gets()` and the implicit input loop.
#[derive(Clone)]
pub struct InputSource(Rc<RefCell<Box<dyn BufRead>>>);

impl InputSource {
    pub fn new(reader: impl BufRead + 'static) -> Self {
        Self::from_boxed(Box::new(reader))
    }

    pub fn from_boxed(reader: Box<dyn BufRead>) -> Self {
        Self(Rc::new(RefCell::new(reader)))
    }

    /// An input with nothing to read.
    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    /// Next line including its terminator, or `None` at end of input.
    pub fn read_line(&self) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.0.borrow_mut().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    }
}

/// Define `gets()`: reads the next input line into `LINE` and returns it.
pub fn bind_input(lua: &Lua, input: &InputSource) -> mlua::Result<()> {
    let input = input.clone();
    let gets = lua.create_function(move |lua, ()| {
        let line = input.read_line().map_err(mlua::Error::external)?;
        lua.globals().set("LINE", line.clone())?;
        Ok(line)
    })?;
    lua.globals().raw_set("gets", gets)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
