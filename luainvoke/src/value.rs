//! Host-side value model.
//!
//! [`ScriptValue`] is what crosses the boundary between the host and the
//! embedded interpreter: input bindings are built from it and every
//! invocation result is converted into it *before* the interpreter handle can
//! be torn down, so results never dangle.
//!
//! | Lua value            | `ScriptValue`                         |
//! |----------------------|---------------------------------------|
//! | `nil`                | `Nil`                                 |
//! | boolean              | `Bool`                                |
//! | integer / float      | `Int` / `Float`                       |
//! | string               | `Str` (lossy UTF-8)                   |
//! | sequence table       | `Array`                               |
//! | any other table      | `Map` (non-scalar keys dropped)       |
//! | table seen before    | `Opaque("table")`                     |
//! | error object         | `Fault`                               |
//! | function, userdata … | `Opaque(type name)`                   |

use std::collections::HashSet;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use mlua::{IntoLua, Lua, MultiValue, Value};

/// Tables nested deeper than this are reported as opaque.
const MAX_DEPTH: usize = 32;

/// Error type host callbacks may return.  See [`crate::signal`] for how it
/// is classified when it crosses back through the interpreter.
pub type HostError = Box<dyn std::error::Error + Send + Sync>;

type Callback = dyn Fn(Vec<ScriptValue>) -> Result<ScriptValue, HostError>;

// ── ScriptValue ───────────────────────────────────────────────────────────────

/// An owned, interpreter-independent value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<ScriptValue>),
    Map(IndexMap<String, ScriptValue>),
    /// A host callback exposed to the script.  Only meaningful as an input.
    Function(HostFunction),
    /// The result of an invocation that ended with a raised fault.
    Fault(Fault),
    /// A value with no host representation; carries the Lua type name.
    Opaque(String),
}

impl ScriptValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(n) => Some(*n),
            ScriptValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            ScriptValue::Fault(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, ScriptValue>> {
        match self {
            ScriptValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) => "integer",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "string",
            ScriptValue::Array(_) => "array",
            ScriptValue::Map(_) => "map",
            ScriptValue::Function(_) => "function",
            ScriptValue::Fault(_) => "fault",
            ScriptValue::Opaque(name) => name,
        }
    }

    /// Convert a Lua value into an owned host value.
    ///
    /// Each table is converted at most once; a table reached again (a cycle,
    /// or a child shared between keys) becomes `Opaque("table")`.
    pub fn from_lua(value: &Value) -> Self {
        Self::from_lua_at(value, 0, &mut HashSet::new())
    }

    /// First value of a multi-value return, or nil.
    pub fn from_multi(values: MultiValue) -> Self {
        values
            .into_iter()
            .next()
            .map(|v| Self::from_lua(&v))
            .unwrap_or_default()
    }

    fn from_lua_at(value: &Value, depth: usize, seen: &mut Seen) -> Self {
        match value {
            Value::Nil => ScriptValue::Nil,
            Value::Boolean(b) => ScriptValue::Bool(*b),
            Value::Integer(n) => ScriptValue::Int(*n),
            Value::Number(f) => ScriptValue::Float(*f),
            Value::String(s) => ScriptValue::Str(s.to_string_lossy().to_string()),
            Value::Table(t) if depth < MAX_DEPTH && seen.insert(t.to_pointer()) => {
                table_to_value(t, depth, seen)
            }
            Value::Error(err) => match crate::signal::fault_from_error(err) {
                Some(fault) => ScriptValue::Fault(fault),
                None => ScriptValue::Opaque("error".to_owned()),
            },
            Value::UserData(ud) if ud.is::<crate::redirect::HostStream>() => {
                ScriptValue::Opaque("stream".to_owned())
            }
            other => ScriptValue::Opaque(other.type_name().to_owned()),
        }
    }
}

/// Tables already converted, by identity.
type Seen = HashSet<*const c_void>;

fn table_to_value(table: &mlua::Table, depth: usize, seen: &mut Seen) -> ScriptValue {
    let len = table.raw_len();
    let mut entries: Vec<(Value, Value)> = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        match pair {
            Ok(kv) => entries.push(kv),
            Err(_) => return ScriptValue::Opaque("table".to_owned()),
        }
    }

    if len > 0 && entries.len() == len {
        let items = (1..=len)
            .map(|i| {
                let item: mlua::Result<Value> = table.raw_get(i);
                item.map(|v| ScriptValue::from_lua_at(&v, depth + 1, seen))
                    .unwrap_or_default()
            })
            .collect();
        return ScriptValue::Array(items);
    }

    let mut map = IndexMap::new();
    for (key, value) in entries {
        let key = match key {
            Value::String(s) => s.to_string_lossy().to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Number(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            _ => continue,
        };
        map.insert(key, ScriptValue::from_lua_at(&value, depth + 1, seen));
    }
    ScriptValue::Map(map)
}

impl IntoLua for ScriptValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            ScriptValue::Nil => Value::Nil,
            ScriptValue::Bool(b) => Value::Boolean(b),
            ScriptValue::Int(n) => Value::Integer(n),
            ScriptValue::Float(f) => Value::Number(f),
            ScriptValue::Str(s) => Value::String(lua.create_string(&s)?),
            ScriptValue::Array(items) => {
                let table = lua.create_table_with_capacity(items.len(), 0)?;
                for (i, item) in items.into_iter().enumerate() {
                    table.raw_set(i + 1, item)?;
                }
                Value::Table(table)
            }
            ScriptValue::Map(map) => {
                let table = lua.create_table_with_capacity(0, map.len())?;
                for (key, item) in map {
                    if !item.is_nil() {
                        table.raw_set(key, item)?;
                    }
                }
                Value::Table(table)
            }
            ScriptValue::Function(fun) => Value::Function(fun.into_lua_function(lua)?),
            ScriptValue::Fault(fault) => {
                let table = lua.create_table()?;
                table.raw_set("kind", fault.kind.as_str())?;
                table.raw_set("message", fault.message)?;
                table.raw_set("traceback", fault.traceback)?;
                Value::Table(table)
            }
            ScriptValue::Opaque(_) => Value::Nil,
        })
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Bool(b) => write!(f, "{b}"),
            ScriptValue::Int(n) => write!(f, "{n}"),
            ScriptValue::Float(x) => write!(f, "{x}"),
            ScriptValue::Str(s) => write!(f, "{s}"),
            ScriptValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ScriptValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
            ScriptValue::Function(fun) => write!(f, "<host fn {}>", fun.name),
            ScriptValue::Fault(fault) => write!(f, "{fault}"),
            ScriptValue::Opaque(name) => write!(f, "<{name}>"),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        ScriptValue::Int(n)
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        ScriptValue::Int(n.into())
    }
}

impl From<f64> for ScriptValue {
    fn from(x: f64) -> Self {
        ScriptValue::Float(x)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::Str(s.to_owned())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::Str(s)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(items: Vec<T>) -> Self {
        ScriptValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

// ── Fault ─────────────────────────────────────────────────────────────────────

/// What kind of fault ended an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The assembled source failed to parse.
    Syntax,
    /// An error raised while the script ran.
    Runtime,
    /// A rejected assignment to a standard stream global.
    Stream,
    /// A [`crate::signal::HostFault`] returned by a host callback.
    Host,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Syntax => "SyntaxError",
            FaultKind::Runtime => "RuntimeError",
            FaultKind::Stream => "StreamError",
            FaultKind::Host => "HostFault",
        }
    }
}

/// A raised, unhandled fault, captured as a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub traceback: Option<String>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), traceback: None }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// The rendering written to the error stream: `message (Kind)` followed
    /// by the traceback, if any.
    pub fn render(&self) -> String {
        let mut out = format!("{} ({})\n", self.message, self.kind.as_str());
        if let Some(tb) = &self.traceback {
            out.push_str(tb);
            if !tb.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

// ── HostFunction ──────────────────────────────────────────────────────────────

/// A host callback that can be handed to a script as an input binding.
#[derive(Clone)]
pub struct HostFunction {
    pub name: String,
    callback: Rc<Callback>,
}

impl HostFunction {
    pub fn new(
        name: impl Into<String>,
        callback: impl Fn(Vec<ScriptValue>) -> Result<ScriptValue, HostError> + 'static,
    ) -> Self {
        Self { name: name.into(), callback: Rc::new(callback) }
    }

    pub fn call(&self, args: Vec<ScriptValue>) -> Result<ScriptValue, HostError> {
        (self.callback)(args)
    }

    fn into_lua_function(self, lua: &Lua) -> mlua::Result<mlua::Function> {
        lua.create_function(move |lua, args: MultiValue| {
            let args = args.iter().map(ScriptValue::from_lua).collect();
            let result = self.call(args).map_err(|e| {
                let e: Box<dyn std::error::Error> = e;
                mlua::Error::external(e)
            })?;
            result.into_lua(lua)
        })
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish()
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.callback, &other.callback)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_table_becomes_array() {
        let lua = Lua::new();
        let v: Value = lua.load("return {1, 'two', 3.5}").eval().unwrap();
        assert_eq!(
            ScriptValue::from_lua(&v),
            ScriptValue::Array(vec![1.into(), "two".into(), 3.5.into()])
        );
    }

    #[test]
    fn keyed_table_becomes_map() {
        let lua = Lua::new();
        let v: Value = lua.load("return {a = 1}").eval().unwrap();
        let out = ScriptValue::from_lua(&v);
        assert_eq!(out.as_map().unwrap().get("a"), Some(&ScriptValue::Int(1)));
    }

    #[test]
    fn cyclic_table_does_not_recurse_forever() {
        let lua = Lua::new();
        let v: Value = lua.load("local t = {} t.self = t return t").eval().unwrap();
        let out = ScriptValue::from_lua(&v);
        assert!(out.as_map().is_some());
    }

    #[test]
    fn functions_are_opaque() {
        let lua = Lua::new();
        let v: Value = lua.load("return print").eval().unwrap();
        assert_eq!(ScriptValue::from_lua(&v), ScriptValue::Opaque("function".into()));
    }

    #[test]
    fn map_into_lua_skips_nil_entries() {
        let lua = Lua::new();
        let mut map = IndexMap::new();
        map.insert("keep".to_owned(), ScriptValue::from("x"));
        map.insert("drop".to_owned(), ScriptValue::Nil);
        let table = match ScriptValue::Map(map).into_lua(&lua).unwrap() {
            Value::Table(t) => t,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(table.contains_key("keep").unwrap());
        assert!(!table.contains_key("drop").unwrap());
    }

    #[test]
    fn host_function_is_callable_from_lua() {
        let lua = Lua::new();
        let double = HostFunction::new("double", |args| {
            let n = args.first().and_then(ScriptValue::as_int).unwrap_or(0);
            Ok(ScriptValue::Int(n * 2))
        });
        lua.globals().set("double", ScriptValue::Function(double)).unwrap();
        let n: i64 = lua.load("return double(21)").eval().unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn fault_render_includes_kind() {
        let f = Fault::new(FaultKind::Runtime, "<script>:1: boom");
        assert_eq!(f.render(), "<script>:1: boom (RuntimeError)\n");
    }
}
