//! Resource realms and component descriptors.
//!
//! A [`ResourceRealm`] locates named script and library resources, the way a
//! classpath does for compiled components.  It owns its own search order and
//! reports absence as `Ok(None)`; only genuine I/O failures are errors.
//!
//! | Realm            | Backing store                              |
//! |------------------|--------------------------------------------|
//! | [`DirRealm`]     | ordered list of directories on disk        |
//! | [`MemoryRealm`]  | in-memory name → bytes table               |
//! | [`crate::embedded::EmbeddedRealm`] | libraries baked into the binary |

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

/// A source of named resources.
pub trait ResourceRealm {
    /// Open `name` for reading.  `Ok(None)` means "not here".
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read>>>;

    /// Human-readable descriptions of every place [`open`](Self::open)
    /// looks, in search order.  Used for not-found diagnostics.
    fn locations(&self) -> Vec<String>;
}

/// Strip the leading `/` that component descriptors carry.
pub(crate) fn relative_name(name: &str) -> &str {
    name.trim_start_matches('/')
}

// ── DirRealm ──────────────────────────────────────────────────────────────────

/// Searches an ordered list of root directories.
#[derive(Debug, Clone, Default)]
pub struct DirRealm {
    roots: Vec<PathBuf>,
}

impl DirRealm {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { roots: roots.into_iter().map(Into::into).collect() }
    }

    pub fn push_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ResourceRealm for DirRealm {
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read>>> {
        let rel = relative_name(name);
        if rel.is_empty() {
            return Ok(None);
        }
        for root in &self.roots {
            let path = root.join(rel);
            if path.is_file() {
                tracing::trace!(path = %path.display(), "resource found in directory realm");
                return Ok(Some(Box::new(File::open(path)?)));
            }
        }
        Ok(None)
    }

    fn locations(&self) -> Vec<String> {
        self.roots.iter().map(|r| format!("dir: {}", r.display())).collect()
    }
}

// ── MemoryRealm ───────────────────────────────────────────────────────────────

/// An in-memory realm, mostly useful for hosts that generate scripts and for
/// tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRealm {
    label: String,
    resources: IndexMap<String, Vec<u8>>,
}

impl MemoryRealm {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), resources: IndexMap::new() }
    }

    /// Add (or replace) a resource.  Leading `/` in `name` is ignored.
    pub fn insert(&mut self, name: &str, content: impl Into<Vec<u8>>) {
        self.resources.insert(relative_name(name).to_owned(), content.into());
    }

    pub fn with(mut self, name: &str, content: impl Into<Vec<u8>>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceRealm for MemoryRealm {
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read>>> {
        Ok(self
            .resources
            .get(relative_name(name))
            .map(|bytes| Box::new(Cursor::new(bytes.clone())) as Box<dyn Read>))
    }

    fn locations(&self) -> Vec<String> {
        vec![format!("memory: {}", self.label)]
    }
}

// ── ComponentDescriptor ───────────────────────────────────────────────────────

/// Identifies a script-backed component.
///
/// Only `implementation` matters to the invoker: it names the script
/// resource inside the component's realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub role: String,
    pub implementation: String,
}

impl ComponentDescriptor {
    pub fn new(role: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self { role: role.into(), implementation: implementation.into() }
    }

    /// The script resource name, always rooted (`/scripts/x.lua`).
    pub fn script_resource(&self) -> String {
        if self.implementation.starts_with('/') {
            self.implementation.clone()
        } else {
            format!("/{}", self.implementation)
        }
    }
}

/// Open `name` as a plain file path, if it exists.
pub(crate) fn open_file(name: &str) -> io::Result<Option<Box<dyn Read>>> {
    let path = Path::new(name);
    if path.is_file() {
        return Ok(Some(Box::new(File::open(path)?)));
    }
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut r: Box<dyn Read>) -> String {
        let mut s = String::new();
        r.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn descriptor_resource_is_rooted() {
        let d = ComponentDescriptor::new("greeter", "scripts/hello.lua");
        assert_eq!(d.script_resource(), "/scripts/hello.lua");
        let d = ComponentDescriptor::new("greeter", "/scripts/hello.lua");
        assert_eq!(d.script_resource(), "/scripts/hello.lua");
    }

    #[test]
    fn memory_realm_ignores_leading_slash() {
        let realm = MemoryRealm::new("test").with("/a/b.lua", "x = 1");
        assert_eq!(read_all(realm.open("a/b.lua").unwrap().unwrap()), "x = 1");
        assert_eq!(read_all(realm.open("/a/b.lua").unwrap().unwrap()), "x = 1");
        assert!(realm.open("missing.lua").unwrap().is_none());
    }

    #[test]
    fn dir_realm_searches_roots_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("lib.lua"), "second").unwrap();
        let realm = DirRealm::new([first.path(), second.path()]);
        assert_eq!(read_all(realm.open("/lib.lua").unwrap().unwrap()), "second");

        std::fs::write(first.path().join("lib.lua"), "first").unwrap();
        assert_eq!(read_all(realm.open("lib.lua").unwrap().unwrap()), "first");
        assert_eq!(realm.locations().len(), 2);
    }

    #[test]
    fn pushed_root_is_searched_last() {
        let first = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        std::fs::write(extra.path().join("late.lua"), "late").unwrap();
        let mut realm = DirRealm::new([first.path()]);
        assert!(realm.open("late.lua").unwrap().is_none());

        realm.push_root(extra.path());
        assert_eq!(realm.roots(), [first.path().to_path_buf(), extra.path().to_path_buf()]);
        assert_eq!(read_all(realm.open("late.lua").unwrap().unwrap()), "late");
    }

    #[test]
    fn dir_realm_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let realm = DirRealm::new([dir.path()]);
        assert!(realm.open("nope.lua").unwrap().is_none());
        assert!(realm.open("/").unwrap().is_none());
    }
}
