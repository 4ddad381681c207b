use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// State shared by built-ins and every stage the interpreter launches.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Exported to each spawned stage on top of the inherited process variables.
    pub vars: HashMap<String, String>,
    /// Directory stages are started in; `cd` moves it.
    pub current_dir: PathBuf,
    /// Set by `exit`/`\quit`; the REPL stops before reading another line.
    pub should_exit: bool,
}

impl Environment {
    /// Snapshot the process variables and working directory.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::in_dir(current_dir)
    }

    /// Snapshot the process variables, but start stages in `current_dir`.
    pub fn in_dir(current_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: stdenv::vars().collect(),
            current_dir: current_dir.into(),
            should_exit: false,
        }
    }

    /// Value of `key` as a spawned stage would see it.
    pub fn var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
