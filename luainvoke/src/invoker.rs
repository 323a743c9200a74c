//! The script invoker.
//!
//! One [`ScriptInvoker::invoke`] call runs this pipeline:
//!
//! ```text
//! assemble ─▶ handle (own or borrow) ─▶ configure ─▶ bind streams
//!          ─▶ compile + loop switches ─▶ evaluate ─▶ classify
//!          ─▶ report fault to stderr ─▶ tear down (internal only)
//! ```
//!
//! The result is converted to a [`ScriptValue`] before an internally-owned
//! handle is torn down.

use std::fmt;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::rc::Rc;

use indexmap::IndexMap;
use mlua::{Function, Lua, MultiValue};
use regex::Regex;

use crate::assemble::{assemble, ScriptContext};
use crate::configure::{configure, Configuration, Switches, SCRIPT_NAME};
use crate::embedded::EmbeddedRealm;
use crate::engine::{EngineError, EngineRegistry};
use crate::error::{InvokeError, Result};
use crate::handle::{HandleId, InterpreterHandle};
use crate::realm::{ComponentDescriptor, ResourceRealm};
use crate::redirect::{bind_input, bind_streams, InputSource};
use crate::signal::{classify, classify_error, ControlSignal};
use crate::value::ScriptValue;

type TeardownObserver = Rc<dyn Fn(HandleId)>;

/// Configures and runs one script per call.
pub struct ScriptInvoker {
    reader: Option<Box<dyn Read>>,
    component: Option<(ComponentDescriptor, Rc<dyn ResourceRealm>)>,
    ambient: Rc<dyn ResourceRealm>,
    switches: Switches,
    lib_paths: Vec<String>,
    req_libs: Vec<String>,
    inputs: IndexMap<String, ScriptValue>,
    args: Vec<String>,
    input: Option<InputSource>,
    runtime: Option<Rc<InterpreterHandle>>,
    engine: Option<(Rc<EngineRegistry>, String)>,
    teardown_observers: Vec<TeardownObserver>,
}

impl Default for ScriptInvoker {
    fn default() -> Self {
        Self {
            reader: None,
            component: None,
            ambient: Rc::new(EmbeddedRealm),
            switches: Switches::default(),
            lib_paths: Vec::new(),
            req_libs: Vec::new(),
            inputs: IndexMap::new(),
            args: Vec::new(),
            input: None,
            runtime: None,
            engine: None,
            teardown_observers: Vec::new(),
        }
    }
}

impl ScriptInvoker {
    /// An invoker with no script source yet; see [`set_reader`](Self::set_reader).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reader(reader: impl Read + 'static) -> Self {
        let mut invoker = Self::new();
        invoker.set_reader(reader);
        invoker
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Self::from_reader(Cursor::new(source.into()))
    }

    /// A component-backed invoker: the script is the descriptor's
    /// implementation resource, and `realm` is searched first for libraries.
    pub fn from_descriptor(descriptor: ComponentDescriptor, realm: Rc<dyn ResourceRealm>) -> Self {
        Self { component: Some((descriptor, realm)), ..Self::default() }
    }

    // ── Setters ───────────────────────────────────────────────────────────────

    /// Script source.  Wins over a component descriptor.
    pub fn set_reader(&mut self, reader: impl Read + 'static) {
        self.reader = Some(Box::new(reader));
    }

    /// `-n`
    pub fn set_assume_loop(&mut self, on: bool) {
        self.switches.assume_loop = on;
    }

    /// `-p`
    pub fn set_assume_print_loop(&mut self, on: bool) {
        self.switches.assume_print_loop = on;
    }

    /// `-a`
    pub fn set_auto_split(&mut self, on: bool) {
        self.switches.auto_split = on;
    }

    /// `-l`
    pub fn set_process_line_ends(&mut self, on: bool) {
        self.switches.process_line_ends = on;
    }

    /// `-W#`
    pub fn set_warning(&mut self, level: i32) {
        self.switches.warning = level;
    }

    /// `-d`: sets `DEBUG` and echoes the assembled source to the output
    /// sink before evaluation.
    pub fn set_debug(&mut self, on: bool) {
        self.switches.debug = on;
    }

    /// `-F`: regex used by `-a` instead of whitespace.
    pub fn set_field_separator(&mut self, pattern: impl Into<String>) {
        self.switches.field_separator = Some(pattern.into());
    }

    /// `-I`
    pub fn add_lib_path(&mut self, path: impl Into<String>) {
        self.lib_paths.push(path.into());
    }

    /// `-r`
    pub fn add_req_lib(&mut self, library: impl Into<String>) {
        self.req_libs.push(library.into());
    }

    /// A script argument, appended to `ARGV` after the `-I` entry.
    pub fn add_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    /// Bind `value` as `INPUTS[key]`.  Later calls replace earlier ones; a
    /// nil value is never exposed.
    pub fn input_value(&mut self, key: impl Into<String>, value: impl Into<ScriptValue>) {
        self.inputs.insert(key.into(), value.into());
    }

    /// Reader behind `gets()` and the `-n` loop.  Defaults to host stdin.
    pub fn set_input(&mut self, input: impl io::BufRead + 'static) {
        self.input = Some(InputSource::new(input));
    }

    /// Evaluate in a host-owned interpreter instead of a fresh one.
    pub fn set_runtime(&mut self, runtime: Rc<InterpreterHandle>) {
        self.runtime = Some(runtime);
    }

    /// Loader consulted for libraries when there is no component realm.
    pub fn set_ambient_loader(&mut self, loader: Rc<dyn ResourceRealm>) {
        self.ambient = loader;
    }

    /// Evaluate through `registry`'s engine for `language`.
    pub fn use_engine(&mut self, registry: Rc<EngineRegistry>, language: impl Into<String>) {
        self.engine = Some((registry, language.into()));
    }

    /// Called with the handle id whenever this invoker tears down an
    /// interpreter it created.
    pub fn on_teardown(&mut self, observer: impl Fn(HandleId) + 'static) {
        self.teardown_observers.push(Rc::new(observer));
    }

    pub fn switches(&self) -> &Switches {
        &self.switches
    }

    pub fn lib_paths(&self) -> &[String] {
        &self.lib_paths
    }

    pub fn req_libs(&self) -> &[String] {
        &self.req_libs
    }

    pub fn inputs(&self) -> &IndexMap<String, ScriptValue> {
        &self.inputs
    }

    // ── Invocation ────────────────────────────────────────────────────────────

    /// Run against the host's stdout and stderr.
    pub fn invoke(&mut self) -> Result<ScriptValue> {
        self.invoke_with(io::stdout(), io::stderr())
    }

    /// Run with `out` and `err` bound as the script's standard streams.
    pub fn invoke_with(&mut self, out: impl Write + 'static, err: impl Write + 'static) -> Result<ScriptValue> {
        self.evaluate_with(out, err)?.into_value()
    }

    /// Like [`invoke_with`](Self::invoke_with), but returns the classified
    /// signal so the host can tell `exit(n)` from `return n`.
    pub fn evaluate_with(&mut self, mut out: impl Write + 'static, err: impl Write + 'static) -> Result<ControlSignal> {
        let source = self.assemble_source()?;
        if self.switches.debug {
            tracing::info!(target: "luainvoke::debug", "{source}");
            writeln!(out, "{source}")
                .map_err(|source| InvokeError::Io { what: "debug echo".to_owned(), source })?;
        }

        match &self.runtime {
            Some(runtime) => self.run(runtime, &source, Box::new(out), Box::new(err)),
            None => {
                let handle = InterpreterHandle::internal()?;
                for observer in &self.teardown_observers {
                    let observer = Rc::clone(observer);
                    handle.on_teardown(move |id| observer(id));
                }
                let signal = self.run(&handle, &source, Box::new(out), Box::new(err));
                handle.tear_down();
                signal
            }
        }
    }

    fn assemble_source(&mut self) -> Result<String> {
        let mut main = match self.reader.take() {
            Some(reader) => reader,
            None => self.component_script()?,
        };
        let realm = self.component.as_ref().map(|(_, realm)| realm.as_ref());
        let ctx = ScriptContext::new(realm, self.ambient.as_ref());
        assemble(&ctx, &self.req_libs, &mut main)
    }

    fn component_script(&self) -> Result<Box<dyn Read>> {
        let (descriptor, realm) = self.component.as_ref().ok_or(InvokeError::MissingScriptSource)?;
        let name = descriptor.script_resource();
        match realm.open(&name) {
            Ok(Some(stream)) => Ok(stream),
            Ok(None) => Err(InvokeError::ResourceNotFound { name, searched: realm.locations() }),
            Err(source) => Err(InvokeError::Io { what: name, source }),
        }
    }

    fn run(
        &self,
        handle: &InterpreterHandle,
        source: &str,
        out: Box<dyn Write>,
        err: Box<dyn Write>,
    ) -> Result<ControlSignal> {
        let lua = handle.lua();
        let separator = self.switches.field_separator.as_deref().map(Regex::new).transpose()?;

        let config = Configuration {
            switches: &self.switches,
            lib_paths: &self.lib_paths,
            req_libs: &self.req_libs,
            inputs: &self.inputs,
            args: &self.args,
        };
        configure(handle, &config)?;
        let streams = bind_streams(lua, handle.bindings(), out, err)?;
        let input = self.input.clone().unwrap_or_else(|| InputSource::new(BufReader::new(io::stdin())));
        bind_input(lua, &input)?;

        let signal = match &self.engine {
            Some((registry, language)) => self.dispatch(registry, language, lua, source)?,
            None => match Program::compile(lua, source, &self.switches, separator, input) {
                Ok(program) => classify(program.run(lua)),
                Err(e) => classify_error(e),
            },
        };

        if let ControlSignal::RaisedFault(fault) = &signal {
            streams.write_global(lua, handle.bindings(), "stderr", fault.render().as_bytes());
        }
        streams.flush();
        Ok(signal)
    }

    fn dispatch(&self, registry: &EngineRegistry, language: &str, lua: &Lua, source: &str) -> Result<ControlSignal> {
        if self.switches.assume_loop || self.switches.assume_print_loop {
            tracing::warn!(language, "loop switches are not applied when evaluating through a script engine");
        }
        match registry.eval(language, lua, SCRIPT_NAME, source) {
            Ok(value) => Ok(ControlSignal::NormalValue(value)),
            Err(EngineError::EvaluationFault { language, fault }) => {
                tracing::warn!(%language, %fault, "script engine reported a fault");
                Ok(ControlSignal::RaisedFault(fault))
            }
            Err(EngineError::Unclassified(err)) => Ok(classify_error(err)),
            Err(other) => Err(other.into()),
        }
    }
}

impl fmt::Debug for ScriptInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptInvoker")
            .field("component", &self.component.as_ref().map(|(d, _)| d))
            .field("switches", &self.switches)
            .field("lib_paths", &self.lib_paths)
            .field("req_libs", &self.req_libs)
            .field("inputs", &self.inputs)
            .field("args", &self.args)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

// ── Program ───────────────────────────────────────────────────────────────────

enum Splitter {
    Whitespace,
    Pattern(Regex),
}

impl Splitter {
    fn fields(&self, line: &str) -> Vec<String> {
        match self {
            Splitter::Whitespace => line.split_whitespace().map(str::to_owned).collect(),
            Splitter::Pattern(re) => {
                let mut fields: Vec<String> = re.split(line).map(str::to_owned).collect();
                while fields.last().is_some_and(|f| f.is_empty()) {
                    fields.pop();
                }
                fields
            }
        }
    }
}

/// The compiled chunk plus the `-n`/`-p`/`-l`/`-a` transformations.
struct Program {
    chunk: Function,
    emit_line: Option<Function>,
    assume_loop: bool,
    chomp: bool,
    splitter: Option<Splitter>,
    input: InputSource,
}

impl Program {
    fn compile(
        lua: &Lua,
        source: &str,
        switches: &Switches,
        separator: Option<Regex>,
        input: InputSource,
    ) -> mlua::Result<Self> {
        let chunk = lua.load(source).set_name(format!("={SCRIPT_NAME}")).into_function()?;
        let emit_line = if switches.assume_print_loop {
            let eol = if switches.process_line_ends { "\\n" } else { "" };
            let src = format!("local line = LINE if line ~= nil then stdout:write(tostring(line), \"{eol}\") end");
            Some(lua.load(src).set_name("=print-loop").into_function()?)
        } else {
            None
        };
        let splitter = switches.auto_split.then(|| match separator {
            Some(re) => Splitter::Pattern(re),
            None => Splitter::Whitespace,
        });
        Ok(Self {
            chunk,
            emit_line,
            assume_loop: switches.assume_loop,
            chomp: switches.process_line_ends,
            splitter,
            input,
        })
    }

    fn run(&self, lua: &Lua) -> mlua::Result<MultiValue> {
        if !self.assume_loop {
            let result = self.chunk.call::<MultiValue>(())?;
            self.print_line()?;
            return Ok(result);
        }

        let globals = lua.globals();
        while let Some(mut line) = self.input.read_line().map_err(mlua::Error::external)? {
            if self.chomp {
                chomp(&mut line);
            }
            if let Some(splitter) = &self.splitter {
                globals.raw_set("F", splitter.fields(&line))?;
            }
            globals.raw_set("LINE", line)?;
            self.chunk.call::<()>(())?;
            self.print_line()?;
        }
        Ok(MultiValue::new())
    }

    fn print_line(&self) -> mlua::Result<()> {
        match &self.emit_line {
            Some(emit) => emit.call::<()>(()),
            None => Ok(()),
        }
    }
}

fn chomp(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
