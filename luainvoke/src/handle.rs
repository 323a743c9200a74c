//! Interpreter handles.
//!
//! An [`InterpreterHandle`] is one Lua state plus the bookkeeping the invoker
//! layers on top of it.  Ownership is fixed at creation:
//!
//! - **External**: built by the host with [`InterpreterHandle::new`] and lent
//!   to invocations as `Rc<InterpreterHandle>`.  Invocations never tear it
//!   down, so globals set by one invocation are visible to the next.
//! - **Internal**: built by the invoker for a single invocation and torn down
//!   when that invocation ends, however it ends.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::{IntoLua, Lua, Table, Value};

use crate::error::Result;
use crate::globals::{self, Assigned, GlobalBindingSet};
use crate::value::ScriptValue;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub type HandleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Internal,
    External,
}

type TeardownHook = Box<dyn FnOnce(HandleId)>;

pub struct InterpreterHandle {
    lua: Lua,
    id: HandleId,
    ownership: Ownership,
    bindings: Rc<RefCell<GlobalBindingSet>>,
    verbosity: Rc<Cell<Option<bool>>>,
    base_path: String,
    teardown_hooks: RefCell<Vec<TeardownHook>>,
}

impl InterpreterHandle {
    /// A host-owned interpreter that survives across invocations.
    pub fn new() -> Result<Self> {
        Self::create(Ownership::External)
    }

    pub(crate) fn internal() -> Result<Self> {
        Self::create(Ownership::Internal)
    }

    fn create(ownership: Ownership) -> Result<Self> {
        let lua = Lua::new();
        let bindings = Rc::new(RefCell::new(GlobalBindingSet::new()));
        globals::install(&lua, Rc::clone(&bindings))?;

        let package: Option<Table> = lua.globals().get("package")?;
        let base_path = match package {
            Some(package) => {
                let path: Option<String> = package.get("path")?;
                path.unwrap_or_default()
            }
            None => String::new(),
        };

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle = id, ?ownership, "interpreter created");
        Ok(Self {
            lua,
            id,
            ownership,
            bindings,
            verbosity: Rc::new(Cell::new(None)),
            base_path,
            teardown_hooks: RefCell::new(Vec::new()),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_internal(&self) -> bool {
        self.ownership == Ownership::Internal
    }

    /// Current `VERBOSE` state: `None` is nil.
    pub fn verbose(&self) -> Option<bool> {
        self.verbosity.get()
    }

    pub(crate) fn verbosity(&self) -> &Rc<Cell<Option<bool>>> {
        &self.verbosity
    }

    pub(crate) fn bindings(&self) -> &Rc<RefCell<GlobalBindingSet>> {
        &self.bindings
    }

    /// `package.path` as it was when the handle was created.
    pub(crate) fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Assign a global from the host, applying the same checks a script
    /// assignment would.  Rejections come back as
    /// [`crate::InvokeError::StreamBinding`].
    pub fn assign_global(&self, name: &str, value: impl IntoLua) -> Result<()> {
        let value = value.into_lua(&self.lua)?;
        if GlobalBindingSet::assign(&self.bindings, &self.lua, name, value.clone())? == Assigned::Unbound {
            self.lua.globals().raw_set(name, value)?;
        }
        Ok(())
    }

    /// Read a global (bound or plain) as an owned value.
    pub fn global(&self, name: &str) -> Result<ScriptValue> {
        let value: Value = self.lua.globals().get(name)?;
        Ok(ScriptValue::from_lua(&value))
    }

    /// Run `hook` with this handle's id when it is torn down.
    pub fn on_teardown(&self, hook: impl FnOnce(HandleId) + 'static) {
        self.teardown_hooks.borrow_mut().push(Box::new(hook));
    }

    /// Consume and destroy the interpreter.
    pub(crate) fn tear_down(self) {
        drop(self);
    }
}

impl Drop for InterpreterHandle {
    fn drop(&mut self) {
        if let Ok(mut bindings) = self.bindings.try_borrow_mut() {
            bindings.clear();
        }
        for hook in self.teardown_hooks.get_mut().drain(..) {
            hook(self.id);
        }
        tracing::debug!(handle = self.id, ownership = ?self.ownership, "interpreter torn down");
    }
}

impl fmt::Debug for InterpreterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterHandle")
            .field("id", &self.id)
            .field("ownership", &self.ownership)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
