//! Source assembly.
//!
//! The final script text is always *required libraries in declaration order,
//! then the main script*.  Reordering the declared libraries reorders the
//! assembled text identically; nothing else is inserted between segments.

use std::io::Read;

use crate::error::{InvokeError, Result};
use crate::realm::{open_file, ResourceRealm};

/// Where resources are looked up during one invocation.
///
/// Passed explicitly to every stage that resolves resources instead of being
/// installed as ambient thread state.
#[derive(Clone, Copy)]
pub struct ScriptContext<'a> {
    /// The component's resource realm, if the host supplied one.
    pub realm: Option<&'a dyn ResourceRealm>,
    /// The host's ambient loader, consulted only when `realm` is `None`.
    pub ambient: &'a dyn ResourceRealm,
}

impl<'a> ScriptContext<'a> {
    pub fn new(realm: Option<&'a dyn ResourceRealm>, ambient: &'a dyn ResourceRealm) -> Self {
        Self { realm, ambient }
    }
}

/// Resolve a required library to a readable stream.
///
/// With a realm: the realm first, then `name` as a filesystem path.  Without
/// one: the ambient loader only.  The `ResourceNotFound` error lists every
/// location that was tried.
pub fn open_library(ctx: &ScriptContext<'_>, name: &str) -> Result<Box<dyn Read>> {
    let io_err = |source: std::io::Error| InvokeError::Io { what: name.to_owned(), source };
    let mut searched = Vec::new();

    match ctx.realm {
        Some(realm) => {
            if let Some(stream) = realm.open(name).map_err(io_err)? {
                tracing::debug!(library = name, "resolved from resource realm");
                return Ok(stream);
            }
            searched.extend(realm.locations());
            if let Some(stream) = open_file(name).map_err(io_err)? {
                tracing::debug!(library = name, "resolved from filesystem");
                return Ok(stream);
            }
            searched.push(format!("file: {name}"));
        }
        None => {
            if let Some(stream) = ctx.ambient.open(name).map_err(io_err)? {
                tracing::debug!(library = name, "resolved from ambient loader");
                return Ok(stream);
            }
            searched.extend(ctx.ambient.locations());
        }
    }

    Err(InvokeError::ResourceNotFound { name: name.to_owned(), searched })
}

/// Concatenate every required library, then the main script.
///
/// Each library stream is drained and dropped before the next is opened.
pub fn assemble(ctx: &ScriptContext<'_>, libraries: &[String], main: &mut dyn Read) -> Result<String> {
    let mut buf = Vec::new();

    for name in libraries {
        let mut stream = open_library(ctx, name)?;
        stream
            .read_to_end(&mut buf)
            .map_err(|source| InvokeError::Io { what: name.clone(), source })?;
    }

    main.read_to_end(&mut buf)
        .map_err(|source| InvokeError::Io { what: "main script".to_owned(), source })?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedRealm;
    use crate::realm::MemoryRealm;
    use std::io::Cursor;

    fn libs(names: &[&str]) -> Vec<String> {
        names.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn libraries_precede_main_in_declaration_order() {
        let realm = MemoryRealm::new("t").with("a.lua", "A\n").with("b.lua", "B\n");
        let ctx = ScriptContext::new(Some(&realm), &EmbeddedRealm);

        let out = assemble(&ctx, &libs(&["a.lua", "b.lua"]), &mut Cursor::new("MAIN")).unwrap();
        assert_eq!(out, "A\nB\nMAIN");

        let out = assemble(&ctx, &libs(&["b.lua", "a.lua"]), &mut Cursor::new("MAIN")).unwrap();
        assert_eq!(out, "B\nA\nMAIN");
    }

    #[test]
    fn no_libraries_is_just_main() {
        let ctx = ScriptContext::new(None, &EmbeddedRealm);
        let out = assemble(&ctx, &[], &mut Cursor::new("return 1")).unwrap();
        assert_eq!(out, "return 1");
    }

    #[test]
    fn filesystem_fallback_when_realm_lacks_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.lua");
        std::fs::write(&path, "DISK\n").unwrap();
        let realm = MemoryRealm::new("empty");
        let ctx = ScriptContext::new(Some(&realm), &EmbeddedRealm);

        let name = path.display().to_string();
        let out = assemble(&ctx, &[name], &mut Cursor::new("MAIN")).unwrap();
        assert_eq!(out, "DISK\nMAIN");
    }

    #[test]
    fn ambient_loader_used_without_realm() {
        let ctx = ScriptContext::new(None, &EmbeddedRealm);
        let out = assemble(&ctx, &libs(&["fmt.lua"]), &mut Cursor::new("")).unwrap();
        assert!(out.contains("function printf"));
    }

    #[test]
    fn ambient_loader_not_used_with_realm() {
        let realm = MemoryRealm::new("scripts");
        let ctx = ScriptContext::new(Some(&realm), &EmbeddedRealm);
        let err = open_library(&ctx, "fmt.lua").err().unwrap();
        match err {
            InvokeError::ResourceNotFound { name, searched } => {
                assert_eq!(name, "fmt.lua");
                assert_eq!(searched, vec!["memory: scripts".to_owned(), "file: fmt.lua".to_owned()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_without_realm_lists_ambient_locations() {
        let ctx = ScriptContext::new(None, &EmbeddedRealm);
        let err = open_library(&ctx, "missing.lua").err().unwrap();
        let msg = err.to_string();
        assert!(msg.starts_with("cannot find: missing.lua in:"), "{msg}");
        assert!(msg.contains("[0]  embedded: lib/lua"), "{msg}");
    }
}
