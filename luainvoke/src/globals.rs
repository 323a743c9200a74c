//! Validated, read-only and accessor globals.
//!
//! Lua has no per-variable setters, so bound globals are not stored in the
//! global table at all.  [`install`] puts a metatable on `_G` whose
//! `__index` / `__newindex` consult the [`GlobalBindingSet`]; names the set
//! does not know fall through to ordinary raw globals.
//!
//! | Access        | Read                    | Write                          |
//! |---------------|-------------------------|--------------------------------|
//! | `ReadOnly`    | stored value            | [`BindingError::ReadOnly`]     |
//! | `Writable`    | stored value            | always accepted                |
//! | `Validated`   | stored value            | accepted if the validator agrees |
//! | `Accessor`    | [`Accessor::get`]       | [`Accessor::set`]              |

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use mlua::{Lua, Table, Value};

use crate::error::BindingError;

/// Checks a proposed new value.  Arguments: interpreter, global name, new
/// value, current value.
pub type Validator = Rc<dyn Fn(&Lua, &str, &Value, &Value) -> Result<(), BindingError>>;

/// A computed global.
pub trait Accessor {
    fn get(&self, lua: &Lua) -> mlua::Result<Value>;
    fn set(&self, lua: &Lua, value: Value) -> Result<(), BindingError>;
}

#[derive(Clone)]
pub enum Access {
    ReadOnly,
    Writable,
    Validated(Validator),
    Accessor(Rc<dyn Accessor>),
}

struct GlobalBinding {
    value: Value,
    access: Access,
}

/// The bound globals of one interpreter handle.
#[derive(Default)]
pub struct GlobalBindingSet {
    bindings: IndexMap<String, GlobalBinding>,
}

/// What a write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assigned {
    /// The name is bound and the write was accepted.
    Bound,
    /// The name is not bound; the caller stores it as a plain global.
    Unbound,
}

impl GlobalBindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn define_with(&mut self, name: &str, value: Value, access: Access) {
        tracing::trace!(global = name, "define");
        self.bindings.insert(name.to_owned(), GlobalBinding { value, access });
    }

    pub fn define_readonly(&mut self, name: &str, value: Value) {
        self.define_with(name, value, Access::ReadOnly);
    }

    pub fn define_writable(&mut self, name: &str, value: Value) {
        self.define_with(name, value, Access::Writable);
    }

    pub fn define_validated(&mut self, name: &str, value: Value, validator: Validator) {
        self.define_with(name, value, Access::Validated(validator));
    }

    pub fn define_accessor(&mut self, name: &str, accessor: Rc<dyn Accessor>) {
        self.define_with(name, Value::Nil, Access::Accessor(accessor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn is_readonly(&self, name: &str) -> bool {
        matches!(self.bindings.get(name), Some(GlobalBinding { access: Access::ReadOnly, .. }))
    }

    /// Bound names, in definition order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Read a bound global.  `Ok(None)` if `name` is not bound.
    pub fn read(set: &RefCell<Self>, lua: &Lua, name: &str) -> mlua::Result<Option<Value>> {
        let accessor = {
            let this = set.borrow();
            match this.bindings.get(name) {
                None => return Ok(None),
                Some(GlobalBinding { access: Access::Accessor(a), .. }) => Rc::clone(a),
                Some(binding) => return Ok(Some(binding.value.clone())),
            }
        };
        accessor.get(lua).map(Some)
    }

    /// Write a bound global through its access rule.
    ///
    /// The set is not borrowed while a validator or accessor runs, so those
    /// may call back into the interpreter (and hence into [`read`](Self::read)).
    pub fn assign(set: &RefCell<Self>, lua: &Lua, name: &str, value: Value) -> Result<Assigned, BindingError> {
        let (access, current) = {
            let this = set.borrow();
            match this.bindings.get(name) {
                None => return Ok(Assigned::Unbound),
                Some(binding) => (binding.access.clone(), binding.value.clone()),
            }
        };

        match access {
            Access::ReadOnly => return Err(BindingError::ReadOnly { name: name.to_owned() }),
            Access::Writable => {}
            Access::Validated(validator) => validator(lua, name, &value, &current)?,
            Access::Accessor(accessor) => {
                accessor.set(lua, value)?;
                return Ok(Assigned::Bound);
            }
        }

        if let Some(binding) = set.borrow_mut().bindings.get_mut(name) {
            binding.value = value;
        }
        Ok(Assigned::Bound)
    }
}

/// Remove raw globals that shadow bound names; Lua never consults the
/// metatable for keys present in the table itself.
pub fn unshadow(lua: &Lua, set: &GlobalBindingSet) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in set.names() {
        globals.raw_set(name, Value::Nil)?;
    }
    Ok(())
}

/// Route reads and writes of bound names on `_G` through `set`.
pub fn install(lua: &Lua, set: Rc<RefCell<GlobalBindingSet>>) -> mlua::Result<()> {
    unshadow(lua, &set.borrow())?;
    let globals = lua.globals();

    let meta = lua.create_table()?;

    let reader = Rc::clone(&set);
    meta.set(
        "__index",
        lua.create_function(move |lua, (_, key): (Table, Value)| {
            let Value::String(name) = key else { return Ok(Value::Nil) };
            let name = name.to_string_lossy().to_string();
            Ok(GlobalBindingSet::read(&reader, lua, &name)?.unwrap_or(Value::Nil))
        })?,
    )?;

    let writer = set;
    meta.set(
        "__newindex",
        lua.create_function(move |lua, (table, key, value): (Table, Value, Value)| {
            if let Value::String(name) = &key {
                let name = name.to_string_lossy().to_string();
                match GlobalBindingSet::assign(&writer, lua, &name, value.clone()) {
                    Ok(Assigned::Bound) => return Ok(()),
                    Ok(Assigned::Unbound) => {}
                    Err(e) => return Err(mlua::Error::external(e)),
                }
            }
            table.raw_set(key, value)
        })?,
    )?;

    globals.set_metatable(Some(meta));
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn setup() -> (Lua, Rc<RefCell<GlobalBindingSet>>) {
        let lua = Lua::new();
        let set = Rc::new(RefCell::new(GlobalBindingSet::new()));
        (lua, set)
    }

    #[test]
    fn readonly_rejects_script_assignment() {
        let (lua, set) = setup();
        set.borrow_mut().define_readonly("ANSWER", Value::Integer(42));
        install(&lua, Rc::clone(&set)).unwrap();

        let n: i64 = lua.load("return ANSWER").eval().unwrap();
        assert_eq!(n, 42);

        assert!(set.borrow().is_readonly("ANSWER"));
        assert!(!set.borrow().is_readonly("UNBOUND"));

        let err = lua.load("ANSWER = 1").exec().unwrap_err();
        assert!(err.to_string().contains("ANSWER is a read-only variable"), "{err}");
        let n: i64 = lua.load("return ANSWER").eval().unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn unbound_names_are_plain_globals() {
        let (lua, set) = setup();
        install(&lua, Rc::clone(&set)).unwrap();
        lua.load("x = 5").exec().unwrap();
        let raw: i64 = lua.globals().raw_get("x").unwrap();
        assert_eq!(raw, 5);
    }

    #[test]
    fn validator_sees_new_and_current_values() {
        let (lua, set) = setup();
        let only_strings: Validator = Rc::new(|_: &Lua, name: &str, new: &Value, _: &Value| match new {
            Value::String(_) => Ok(()),
            other => Err(BindingError::TypeMismatch {
                name: name.to_owned(),
                expected: "string".into(),
                given: other.type_name().into(),
            }),
        });
        set.borrow_mut().define_validated("NAME", Value::Nil, only_strings);
        install(&lua, Rc::clone(&set)).unwrap();

        lua.load("NAME = 'ok'").exec().unwrap();
        let s: String = lua.load("return NAME").eval().unwrap();
        assert_eq!(s, "ok");
        assert!(lua.load("NAME = 3").exec().is_err());
    }

    struct Counter(Cell<i64>);

    impl Accessor for Counter {
        fn get(&self, _: &Lua) -> mlua::Result<Value> {
            Ok(Value::Integer(self.0.get()))
        }
        fn set(&self, _: &Lua, value: Value) -> Result<(), BindingError> {
            if let Value::Integer(n) = value {
                self.0.set(n * 10);
            }
            Ok(())
        }
    }

    #[test]
    fn accessor_controls_both_directions() {
        let (lua, set) = setup();
        let counter = Rc::new(Counter(Cell::new(1)));
        set.borrow_mut().define_accessor("C", counter.clone());
        install(&lua, Rc::clone(&set)).unwrap();

        lua.load("C = 4").exec().unwrap();
        assert_eq!(counter.0.get(), 40);
        let n: i64 = lua.load("return C").eval().unwrap();
        assert_eq!(n, 40);
    }

    #[test]
    fn host_assign_returns_typed_error() {
        let (lua, set) = setup();
        set.borrow_mut().define_readonly("RO", Value::Nil);
        let err = GlobalBindingSet::assign(&set, &lua, "RO", Value::Integer(1)).unwrap_err();
        assert_eq!(err, BindingError::ReadOnly { name: "RO".into() });
        assert_eq!(
            GlobalBindingSet::assign(&set, &lua, "free", Value::Nil).unwrap(),
            Assigned::Unbound
        );
    }
}
