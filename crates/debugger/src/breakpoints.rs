//! File identities and the per-file breakpoint maps.
//!
//! Lookup by (file, line) runs on every executed line of the VM, so the
//! store is a hash map of hash maps. All access is serialized by the
//! pause coordinator's mutex; the store itself carries no locking.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use transport::types::BreakpointId;

/// Paths on these platforms compare case-insensitively.
const CASE_INSENSITIVE_PATHS: bool = cfg!(any(windows, target_os = "macos"));

/// Interned handle for one script file.
///
/// Handles compare by identity: two lookups of the same (normalized)
/// path yield the same allocation for the lifetime of the agent.
#[derive(Debug, Clone, Eq)]
pub struct FileIdentity(Arc<str>);

impl FileIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for FileIdentity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::hash::Hash for FileIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

fn normalize(path: &str) -> Cow<'_, str> {
    if CASE_INSENSITIVE_PATHS {
        Cow::Owned(path.to_lowercase())
    } else {
        Cow::Borrowed(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub line: u32,
}

/// Mapping from file identity to its line-indexed breakpoints.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    names: HashMap<Box<str>, FileIdentity>,
    breakpoints: HashMap<FileIdentity, HashMap<u32, Breakpoint>>,
    total: usize,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the identity of `path` without creating one.
    pub fn find_file(&self, path: &str) -> Option<FileIdentity> {
        self.names.get(normalize(path).as_ref()).cloned()
    }

    /// Look up the identity of `path`, minting one on first use.
    pub fn ensure_file(&mut self, path: &str) -> FileIdentity {
        let normalized = normalize(path);
        if let Some(identity) = self.names.get(normalized.as_ref()) {
            return identity.clone();
        }
        let identity = FileIdentity(Arc::from(normalized.as_ref()));
        self.names
            .insert(normalized.into_owned().into_boxed_str(), identity.clone());
        identity
    }

    /// Drop every breakpoint of `file`.
    pub fn clear(&mut self, file: &FileIdentity) {
        if let Some(lines) = self.breakpoints.get_mut(file) {
            self.total -= lines.len();
            lines.clear();
        }
    }

    /// Upsert breakpoints by line; a later entry for the same line
    /// replaces the earlier one.
    pub fn add_all(&mut self, file: &FileIdentity, breakpoints: impl IntoIterator<Item = Breakpoint>) {
        let lines = self.breakpoints.entry(file.clone()).or_default();
        for bp in breakpoints {
            if lines.insert(bp.line, bp).is_none() {
                self.total += 1;
            }
        }
    }

    /// Point query used on every executed line.
    pub fn lookup(&self, file: &FileIdentity, line: u32) -> Option<Breakpoint> {
        self.breakpoints.get(file)?.get(&line).copied()
    }

    /// Total number of breakpoints across all files.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_interned() {
        let mut store = BreakpointStore::new();
        let a = store.ensure_file("scripts/init.nut");
        let b = store.ensure_file("scripts/init.nut");
        assert_eq!(a, b);
        assert_eq!(store.find_file("scripts/init.nut"), Some(a));
        assert_eq!(store.find_file("other.nut"), None);
    }

    #[test]
    #[cfg(any(windows, target_os = "macos"))]
    fn identities_ignore_case() {
        let mut store = BreakpointStore::new();
        let a = store.ensure_file("Scripts/Init.NUT");
        let b = store.ensure_file("scripts/init.nut");
        assert_eq!(a, b);
    }

    #[test]
    fn re_add_replaces_by_line() {
        let mut store = BreakpointStore::new();
        let file = store.ensure_file("test.nut");
        store.add_all(&file, [Breakpoint { id: 1, line: 10 }]);
        store.add_all(&file, [Breakpoint { id: 2, line: 10 }]);
        assert_eq!(store.lookup(&file, 10), Some(Breakpoint { id: 2, line: 10 }));
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn clear_is_per_file() {
        let mut store = BreakpointStore::new();
        let a = store.ensure_file("a.nut");
        let b = store.ensure_file("b.nut");
        store.add_all(&a, [Breakpoint { id: 1, line: 1 }]);
        store.add_all(&b, [Breakpoint { id: 2, line: 2 }]);
        store.clear(&a);
        assert_eq!(store.lookup(&a, 1), None);
        assert_eq!(store.lookup(&b, 2), Some(Breakpoint { id: 2, line: 2 }));
        assert_eq!(store.total(), 1);
    }
}
