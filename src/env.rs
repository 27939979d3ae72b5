//! Mutable, user-level view of the process environment owned by the REPL.

use std::env as stdenv;
use std::path::PathBuf;

/// Single variable entry. `value` is `None` for names introduced by a bare
/// `export NAME`; such entries show up in `export` listings but are invisible
/// to `env` output and to child processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub name: String,
    pub value: Option<String>,
}

/// The environment table plus the bits of shell state that must survive
/// across lines: the tracked working directory, the last pipeline's exit
/// status (what `$?` expands to), and the flag a REPL loop checks to know
/// when `exit` was requested.
///
/// Entries keep insertion order, and names are unique: setting an existing
/// name overwrites in place, anything else appends.
#[derive(Debug, Clone)]
pub struct Environment {
    entries: Vec<EnvEntry>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
    pub last_status: i32,
}

impl Environment {
    /// Capture the current process state into a new `Environment`.
    pub fn from_process() -> Self {
        let entries = stdenv::vars()
            .map(|(name, value)| EnvEntry {
                name,
                value: Some(value),
            })
            .collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            entries,
            current_dir,
            should_exit: false,
            last_status: 0,
        }
    }

    /// An environment with no variables at all. Mostly useful in tests.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            current_dir: stdenv::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            should_exit: false,
            last_status: 0,
        }
    }

    /// Value of a variable, or `None` when it is unset or unvalued.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    /// Set a variable, overwriting in place when the name already exists.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = Some(value.to_string()),
            None => self.entries.push(EnvEntry {
                name: name.to_string(),
                value: Some(value.to_string()),
            }),
        }
    }

    /// Record a name without a value (`export NAME`). An existing entry keeps
    /// whatever value it already has.
    pub fn set_unvalued(&mut self, name: &str) {
        if !self.entries.iter().any(|e| e.name == name) {
            self.entries.push(EnvEntry {
                name: name.to_string(),
                value: None,
            });
        }
    }

    /// Append to a variable's value (`export NAME+=VALUE`); behaves like a
    /// plain assignment when the variable is unset or unvalued.
    pub fn append(&mut self, name: &str, suffix: &str) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => match &mut entry.value {
                Some(value) => value.push_str(suffix),
                None => entry.value = Some(suffix.to_string()),
            },
            None => self.set(name, suffix),
        }
    }

    /// Remove a variable. Unsetting an absent name is not an error.
    pub fn unset(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EnvEntry> {
        self.entries.iter()
    }

    /// Snapshot of the valued entries, in insertion order, for handing to a
    /// child process. Unvalued names are omitted.
    pub fn snapshot(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|e| e.value.as_deref().map(|v| (e.name.as_str(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut env = Environment::empty();
        assert_eq!(env.get("KEY"), None);
        env.set("KEY", "VALUE");
        assert_eq!(env.get("KEY"), Some("VALUE"));
    }

    #[test]
    fn set_overwrites_in_place_keeping_order() {
        let mut env = Environment::empty();
        env.set("A", "1");
        env.set("B", "2");
        env.set("A", "3");
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(env.get("A"), Some("3"));
    }

    #[test]
    fn names_are_unique_after_repeated_sets() {
        let mut env = Environment::empty();
        env.set("X", "1");
        env.set("X", "2");
        env.set("X", "3");
        assert_eq!(env.iter().filter(|e| e.name == "X").count(), 1);
    }

    #[test]
    fn unvalued_entries_are_listed_but_not_readable() {
        let mut env = Environment::empty();
        env.set_unvalued("MARKER");
        assert_eq!(env.get("MARKER"), None);
        assert!(env.iter().any(|e| e.name == "MARKER" && e.value.is_none()));
        // a later bare export must not clobber a real value
        env.set("MARKER", "now");
        env.set_unvalued("MARKER");
        assert_eq!(env.get("MARKER"), Some("now"));
    }

    #[test]
    fn append_extends_or_assigns() {
        let mut env = Environment::empty();
        env.append("P", "a");
        assert_eq!(env.get("P"), Some("a"));
        env.append("P", "b");
        assert_eq!(env.get("P"), Some("ab"));
    }

    #[test]
    fn unset_removes_entry() {
        let mut env = Environment::empty();
        env.set("GONE", "x");
        env.unset("GONE");
        assert_eq!(env.get("GONE"), None);
        assert!(!env.iter().any(|e| e.name == "GONE"));
        env.unset("NEVER_WAS"); // no-op
    }

    #[test]
    fn snapshot_skips_unvalued_and_keeps_order() {
        let mut env = Environment::empty();
        env.set("A", "1");
        env.set_unvalued("B");
        env.set("C", "3");
        assert_eq!(env.snapshot(), vec![("A", "1"), ("C", "3")]);
    }

    #[test]
    fn from_process_sees_path() {
        let env = Environment::from_process();
        assert!(env.get("PATH").is_some());
    }
}
