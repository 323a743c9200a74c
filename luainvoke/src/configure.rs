//! Interpreter configuration.
//!
//! Applies the invocation's switches to an [`InterpreterHandle`] before any
//! script text runs.  Everything here is redone on every invocation, so an
//! externally-owned handle always reflects the latest invoker settings.
//!
//! | Switch | Field               | Visible to the script as              |
//! |--------|---------------------|---------------------------------------|
//! | `-n`   | `assume_loop`       | `OPT_n`; implicit input loop          |
//! | `-p`   | `assume_print_loop` | `OPT_p`; `LINE` printed after each run |
//! | `-a`   | `auto_split`        | `OPT_a`; `F` split from `LINE`        |
//! | `-l`   | `process_line_ends` | `OPT_l`; chomp and re-terminate       |
//! | `-d`   | `debug`             | `DEBUG`                               |
//! | `-W#`  | `warning`           | `VERBOSE` (`2` → true, else nil)      |
//! | `-F`   | `field_separator`   | splitting pattern for `F`             |

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use mlua::{IntoLua, Lua, Table, Value};

use crate::error::BindingError;
use crate::globals::{self, Accessor, Validator};
use crate::handle::InterpreterHandle;
use crate::signal;
use crate::value::ScriptValue;

/// Nominal name of every evaluated script (`PROGRAM_NAME`, chunk name).
pub const SCRIPT_NAME: &str = "<script>";

/// Interpreter switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switches {
    pub assume_loop: bool,
    pub assume_print_loop: bool,
    pub auto_split: bool,
    pub process_line_ends: bool,
    pub debug: bool,
    /// `-W#` level; `-1` when unset.
    pub warning: i32,
    pub field_separator: Option<String>,
}

impl Default for Switches {
    fn default() -> Self {
        Self {
            assume_loop: false,
            assume_print_loop: false,
            auto_split: false,
            process_line_ends: false,
            debug: false,
            warning: -1,
            field_separator: None,
        }
    }
}

/// Everything the configurator reads from one invocation.
pub struct Configuration<'a> {
    pub switches: &'a Switches,
    pub lib_paths: &'a [String],
    pub req_libs: &'a [String],
    pub inputs: &'a IndexMap<String, ScriptValue>,
    pub args: &'a [String],
}

/// The platform's search-path list separator.
pub fn path_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}

/// `ARGV`: `-I` plus the non-empty library paths, if any, then the script
/// arguments.
pub fn build_argv(lib_paths: &[String], args: &[String]) -> Vec<String> {
    let paths: Vec<&str> = lib_paths.iter().map(String::as_str).filter(|p| !p.is_empty()).collect();
    let mut argv = Vec::with_capacity(args.len() + 1);
    if !paths.is_empty() {
        argv.push(format!("-I{}", paths.join(path_separator())));
    }
    argv.extend(args.iter().cloned());
    argv
}

/// Module name under which a required library is marked loaded:
/// `/util/strings.lua` → `util.strings`.
pub fn module_name(library: &str) -> String {
    let name = library.trim_start_matches('/');
    let name = name.strip_suffix(".lua").unwrap_or(name);
    name.replace(['/', '\\'], ".")
}

fn lua_path(lib_paths: &[String], base: &str) -> String {
    let mut path = String::new();
    for dir in lib_paths.iter().filter(|p| !p.is_empty()) {
        let dir = dir.trim_end_matches('/');
        path.push_str(&format!("{dir}/?.lua;{dir}/?/init.lua;"));
    }
    path.push_str(base);
    path
}

// ── VERBOSE ───────────────────────────────────────────────────────────────────

struct Verbosity(Rc<Cell<Option<bool>>>);

impl Accessor for Verbosity {
    fn get(&self, _: &Lua) -> mlua::Result<Value> {
        Ok(match self.0.get() {
            Some(b) => Value::Boolean(b),
            None => Value::Nil,
        })
    }

    fn set(&self, _: &Lua, value: Value) -> Result<(), BindingError> {
        self.0.set(match value {
            Value::Nil => None,
            Value::Boolean(false) => Some(false),
            _ => Some(true),
        });
        Ok(())
    }
}

fn string_only() -> Validator {
    Rc::new(|_: &Lua, name: &str, new: &Value, _: &Value| match new {
        Value::String(_) => Ok(()),
        other => Err(BindingError::TypeMismatch {
            name: name.to_owned(),
            expected: "string".to_owned(),
            given: other.type_name().to_owned(),
        }),
    })
}

fn flag(on: bool) -> Value {
    if on {
        Value::Boolean(true)
    } else {
        Value::Nil
    }
}

// ── configure ─────────────────────────────────────────────────────────────────

/// Define the invocation globals, load path and warning routing on `handle`.
pub fn configure(handle: &InterpreterHandle, config: &Configuration<'_>) -> mlua::Result<()> {
    let lua = handle.lua();
    let switches = config.switches;

    handle.verbosity().set(if switches.warning == 2 { Some(true) } else { None });

    let argv = build_argv(config.lib_paths, config.args).into_lua(lua)?;
    let inputs = ScriptValue::Map(config.inputs.clone()).into_lua(lua)?;
    let pid = Value::Integer(handle.id() as i64);
    let program_name = Value::String(lua.create_string(SCRIPT_NAME)?);

    {
        let mut bindings = handle.bindings().borrow_mut();
        bindings.clear();
        bindings.define_readonly("ARGV", argv.clone());
        bindings.define_readonly("ARGS", argv);
        bindings.define_readonly("OPT_p", flag(switches.assume_print_loop));
        bindings.define_readonly("OPT_n", flag(switches.assume_loop));
        bindings.define_readonly("OPT_a", flag(switches.auto_split));
        bindings.define_readonly("OPT_l", flag(switches.process_line_ends));
        bindings.define_readonly("INPUTS", inputs);
        bindings.define_accessor("VERBOSE", Rc::new(Verbosity(Rc::clone(handle.verbosity()))));
        bindings.define_writable("DEBUG", Value::Boolean(switches.debug));
        bindings.define_readonly("PID", pid);
        bindings.define_validated("PROGRAM_NAME", program_name, string_only());
        globals::unshadow(lua, &bindings)?;
    }
    tracing::trace!(handle = handle.id(), inputs = config.inputs.len(), "globals defined");

    let g = lua.globals();
    g.raw_set("LINE", Value::Nil)?;
    g.raw_set("F", Value::Nil)?;
    g.raw_set("exit", signal::exit_function(lua, "exit")?)?;
    let os: Option<Table> = g.get("os")?;
    if let Some(os) = os {
        os.set("exit", signal::exit_function(lua, "exit")?)?;
    }

    let package: Option<Table> = g.get("package")?;
    if let Some(package) = package {
        package.set("path", lua_path(config.lib_paths, handle.base_path()))?;
        let loaded: Table = package.get("loaded")?;
        for library in config.req_libs {
            loaded.set(module_name(library), true)?;
        }
    }

    route_warnings(handle)
}

/// `warn(...)` writes `warning: <msg>` to the current `stderr` while
/// `VERBOSE` is true.  `@` control messages are ignored.
fn route_warnings(handle: &InterpreterHandle) -> mlua::Result<()> {
    let lua = handle.lua();
    let emit = lua
        .load("local text = ... stderr:write(text)")
        .set_name("=warn")
        .into_function()?;
    let verbosity = Rc::clone(handle.verbosity());
    let pending = RefCell::new(String::new());

    lua.set_warning_function(move |_, msg: &str, incomplete: bool| {
        let mut buf = pending.borrow_mut();
        buf.push_str(msg);
        if incomplete {
            return Ok(());
        }
        let text = std::mem::take(&mut *buf);
        drop(buf);
        if text.starts_with('@') || verbosity.get() != Some(true) {
            return Ok(());
        }
        emit.call::<()>(format!("warning: {text}\n"))
    });
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(switches: Switches, inputs: IndexMap<String, ScriptValue>) -> InterpreterHandle {
        let handle = InterpreterHandle::internal().unwrap();
        let libs = vec!["/opt/lib".to_owned(), "".to_owned(), "vendor".to_owned()];
        let reqs = vec!["/util/strings.lua".to_owned()];
        let args = vec!["one".to_owned()];
        let config = Configuration {
            switches: &switches,
            lib_paths: &libs,
            req_libs: &reqs,
            inputs: &inputs,
            args: &args,
        };
        configure(&handle, &config).unwrap();
        handle
    }

    #[test]
    fn argv_joins_lib_paths_without_trailing_separator() {
        let sep = path_separator();
        let argv = build_argv(&["a".into(), "".into(), "b".into()], &["x".into()]);
        assert_eq!(argv, vec![format!("-Ia{sep}b"), "x".to_owned()]);
        assert!(build_argv(&[], &[]).is_empty());
    }

    #[test]
    fn module_names() {
        assert_eq!(module_name("/util/strings.lua"), "util.strings");
        assert_eq!(module_name("fmt.lua"), "fmt");
        assert_eq!(module_name("plain"), "plain");
    }

    #[test]
    fn flags_and_readonly_globals() {
        let switches = Switches { assume_loop: true, ..Switches::default() };
        let handle = configured(switches, IndexMap::new());
        let lua = handle.lua();
        let (n, p): (Option<bool>, Option<bool>) = lua.load("return OPT_n, OPT_p").eval().unwrap();
        assert_eq!((n, p), (Some(true), None));
        assert!(lua.load("OPT_n = false").exec().is_err());
        assert!(lua.load("ARGV = {}").exec().is_err());
        assert!(lua.load("PID = 1").exec().is_err());
        let pid: i64 = lua.load("return PID").eval().unwrap();
        assert_eq!(pid, handle.id() as i64);
    }

    #[test]
    fn inputs_table_skips_nil() {
        let mut inputs = IndexMap::new();
        inputs.insert("a".to_owned(), ScriptValue::Int(1));
        inputs.insert("b".to_owned(), ScriptValue::Str("x".into()));
        inputs.insert("gone".to_owned(), ScriptValue::Nil);
        let handle = configured(Switches::default(), inputs);
        let (a, b, count): (i64, String, i64) = handle
            .lua()
            .load("local n = 0 for _ in pairs(INPUTS) do n = n + 1 end return INPUTS.a, INPUTS.b, n")
            .eval()
            .unwrap();
        assert_eq!((a, b.as_str(), count), (1, "x", 2));
    }

    #[test]
    fn verbose_coercion() {
        let handle = configured(Switches::default(), IndexMap::new());
        let lua = handle.lua();
        assert_eq!(handle.verbose(), None);
        lua.load("VERBOSE = 0").exec().unwrap();
        assert_eq!(handle.verbose(), Some(true));
        lua.load("VERBOSE = false").exec().unwrap();
        assert_eq!(handle.verbose(), Some(false));
        lua.load("VERBOSE = nil").exec().unwrap();
        assert_eq!(handle.verbose(), None);

        let handle = configured(Switches { warning: 2, ..Switches::default() }, IndexMap::new());
        let v: Option<bool> = handle.lua().load("return VERBOSE").eval().unwrap();
        assert_eq!(v, Some(true));
    }

    #[test]
    fn program_name_must_stay_a_string() {
        let handle = configured(Switches::default(), IndexMap::new());
        let lua = handle.lua();
        let name: String = lua.load("return PROGRAM_NAME").eval().unwrap();
        assert_eq!(name, SCRIPT_NAME);
        lua.load("PROGRAM_NAME = 'renamed'").exec().unwrap();
        let err = lua.load("PROGRAM_NAME = 5").exec().unwrap_err();
        assert!(err.to_string().contains("PROGRAM_NAME must be a string, integer given"), "{err}");
    }

    #[test]
    fn load_path_and_loaded_libraries() {
        let handle = configured(Switches::default(), IndexMap::new());
        let lua = handle.lua();
        let path: String = lua.load("return package.path").eval().unwrap();
        assert!(path.starts_with("/opt/lib/?.lua;/opt/lib/?/init.lua;vendor/?.lua;"), "{path}");
        assert!(path.ends_with(handle.base_path()));
        let loaded: bool = lua.load("return require('util.strings')").eval().unwrap();
        assert!(loaded);
    }

    #[test]
    fn reconfiguring_does_not_grow_load_path() {
        let handle = configured(Switches::default(), IndexMap::new());
        let first: String = handle.lua().load("return package.path").eval().unwrap();
        let config = Configuration {
            switches: &Switches::default(),
            lib_paths: &["/opt/lib".to_owned(), "".to_owned(), "vendor".to_owned()],
            req_libs: &[],
            inputs: &IndexMap::new(),
            args: &[],
        };
        configure(&handle, &config).unwrap();
        let second: String = handle.lua().load("return package.path").eval().unwrap();
        assert_eq!(first, second);
    }
}
