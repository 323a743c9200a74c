//! Script engine registry.
//!
//! An alternative evaluation backend: instead of compiling the assembled
//! source itself, the invoker can hand it to a [`ScriptEngine`] looked up by
//! language name.  Engines evaluate against the invocation's interpreter, so
//! every configured global and stream binding is in effect.

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use mlua::{Lua, MultiValue};
use thiserror::Error;

use crate::signal::fault_from_error;
use crate::value::{Fault, ScriptValue};

#[derive(Debug, Error)]
pub enum EngineError {
    /// The script raised a fault the engine recognised.
    #[error("{language} evaluation failed: {fault}")]
    EvaluationFault { language: String, fault: Fault },

    /// Anything else the interpreter signalled, including `exit`.
    #[error("{0}")]
    Unclassified(mlua::Error),

    #[error("no script engine registered for language `{0}`")]
    UnknownLanguage(String),
}

/// An evaluation backend.
pub trait ScriptEngine {
    fn language(&self) -> &str;

    /// Evaluate `source` as chunk `name` and return its first value.
    fn eval(&self, lua: &Lua, name: &str, source: &str) -> Result<ScriptValue, EngineError>;
}

/// Evaluates Lua source directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaEngine;

impl ScriptEngine for LuaEngine {
    fn language(&self) -> &str {
        "lua"
    }

    fn eval(&self, lua: &Lua, name: &str, source: &str) -> Result<ScriptValue, EngineError> {
        let outcome: mlua::Result<MultiValue> = lua.load(source).set_name(format!("={name}")).eval();
        match outcome {
            Ok(values) => Ok(ScriptValue::from_multi(values)),
            Err(err) => match fault_from_error(&err) {
                Some(fault) => Err(EngineError::EvaluationFault { language: self.language().to_owned(), fault }),
                None => Err(EngineError::Unclassified(err)),
            },
        }
    }
}

/// Engines by language name, plus a file-extension index.
#[derive(Default)]
pub struct EngineRegistry {
    engines: IndexMap<String, Rc<dyn ScriptEngine>>,
    extensions: IndexMap<String, String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with [`LuaEngine`] registered as `lua` for `.lua` files.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("lua", &["lua"], Rc::new(LuaEngine));
        registry
    }

    /// Register (or replace) the engine for `language`.
    pub fn register(&mut self, language: &str, extensions: &[&str], engine: Rc<dyn ScriptEngine>) {
        tracing::debug!(language, ?extensions, "script engine registered");
        self.engines.insert(language.to_owned(), engine);
        for ext in extensions {
            self.extensions.insert(ext.trim_start_matches('.').to_owned(), language.to_owned());
        }
    }

    pub fn engine(&self, language: &str) -> Option<Rc<dyn ScriptEngine>> {
        self.engines.get(language).cloned()
    }

    /// Language registered for the extension of `path`.
    pub fn language_for_path(&self, path: impl AsRef<Path>) -> Option<&str> {
        let ext = path.as_ref().extension()?.to_str()?;
        self.extensions.get(ext).map(String::as_str)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn eval(&self, language: &str, lua: &Lua, name: &str, source: &str) -> Result<ScriptValue, EngineError> {
        let engine = self
            .engine(language)
            .ok_or_else(|| EngineError::UnknownLanguage(language.to_owned()))?;
        engine.eval(lua, name, source)
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("languages", &self.engines.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
