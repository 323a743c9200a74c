//! Embedded copies of the `lib/lua/` library files.
//!
//! The bundled libraries are baked into the binary at compile time via
//! `include_bytes!()` and served by [`EmbeddedRealm`], the default ambient
//! resource loader.  When an invocation has no resource realm of its own,
//! `-r` libraries are looked up here.
//!
//! # Resolution order for `-r <lib>` (see `assemble::open_library`)
//! 1. the invocation's resource realm, if one was supplied
//! 2. `<lib>` as a path on disk, if the realm did not have it
//! 3. **these embedded files**, only when no realm was supplied at all

use std::io::{self, Cursor, Read};

use crate::realm::{relative_name, ResourceRealm};

/// A single embedded library file.
pub struct EmbeddedFile {
    pub name: &'static str,
    pub content: &'static [u8],
}

/// All embedded `.lua` files from `lib/lua/`.
pub static EMBEDDED_LIBS: &[EmbeddedFile] = &[
    EmbeddedFile { name: "fmt.lua",     content: include_bytes!("../lib/lua/fmt.lua") },
    EmbeddedFile { name: "stringx.lua", content: include_bytes!("../lib/lua/stringx.lua") },
];

/// Look up an embedded file by name, returning its content as UTF-8.
///
/// `name` should be a bare filename (e.g. `"fmt.lua"`); a leading `/` is
/// tolerated.
pub fn get_embedded(name: &str) -> Option<&'static str> {
    let name = relative_name(name);
    EMBEDDED_LIBS
        .iter()
        .find(|f| f.name == name)
        .and_then(|f| std::str::from_utf8(f.content).ok())
}

/// Iterate over all embedded files as `(name, utf8_content)` pairs.
pub fn all_embedded() -> impl Iterator<Item = (&'static str, &'static str)> {
    EMBEDDED_LIBS
        .iter()
        .filter_map(|f| std::str::from_utf8(f.content).ok().map(|s| (f.name, s)))
}

/// The ambient resource loader: serves [`EMBEDDED_LIBS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedRealm;

impl ResourceRealm for EmbeddedRealm {
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read>>> {
        Ok(get_embedded(name).map(|s| Box::new(Cursor::new(s.as_bytes())) as Box<dyn Read>))
    }

    fn locations(&self) -> Vec<String> {
        vec!["embedded: lib/lua".to_owned()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_bare_and_rooted_name() {
        assert!(get_embedded("fmt.lua").is_some());
        assert!(get_embedded("/stringx.lua").is_some());
        assert!(get_embedded("nope.lua").is_none());
    }

    #[test]
    fn embedded_libs_are_concatenable() {
        // Libraries are spliced ahead of scripts, so none may end the chunk.
        for (name, content) in all_embedded() {
            let last = content.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            assert!(!last.trim_start().starts_with("return"), "{name} ends with return");
            assert!(content.ends_with('\n'), "{name} lacks a trailing newline");
        }
    }

    #[test]
    fn embedded_libs_compile() {
        let lua = mlua::Lua::new();
        for (name, content) in all_embedded() {
            lua.load(content)
                .set_name(name)
                .into_function()
                .unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }
}
