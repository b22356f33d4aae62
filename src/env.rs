use std::collections::BTreeMap;
use std::env as stdenv;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::search::SearchPath;

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: environment variables handed to every launched program.
/// - `current_dir`: the working directory, kept in sync with the process by `cd`.
/// - `should_exit`: set by the `exit` builtin to stop the input loop.
///
/// Variables are kept as raw OS strings, so values that are not valid UTF-8 reach
/// launched programs unchanged.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: BTreeMap<OsString, OsString>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// When set to true, indicates that an interactive loop should exit.
    pub should_exit: bool,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_vars(stdenv::vars_os(), current_dir)
    }

    /// Build an environment from explicit variables, ignoring the process state.
    pub fn with_vars<I, K, V>(vars: I, current_dir: PathBuf) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            current_dir,
            should_exit: false,
        }
    }

    /// Value of `key`, if it is set and valid UTF-8.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.get_var_os(key).and_then(OsStr::to_str)
    }

    pub fn get_var_os(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    /// Set or override an environment variable.
    pub fn set_var(&mut self, key: impl Into<OsString>, val: impl Into<OsString>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Snapshot the state the process core depends on.
    ///
    /// Called once per command so that changes to `PATH` between commands are seen.
    pub fn config(&self) -> ShellConfig {
        ShellConfig {
            search_path: self
                .get_var_os("PATH")
                .map(SearchPath::parse)
                .unwrap_or_default(),
            home: self.get_var_os("HOME").map(PathBuf::from),
            vars: self.vars.clone(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit configuration for launching processes.
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Directories tried in order when resolving a bare command name.
    pub search_path: SearchPath,
    /// Default target of `cd`.
    pub home: Option<PathBuf>,
    /// Environment passed to launched programs.
    pub vars: BTreeMap<OsString, OsString>,
}

impl ShellConfig {
    pub fn new(search_path: SearchPath) -> Self {
        Self {
            search_path,
            ..Self::default()
        }
    }

    /// Configuration derived from the current process environment.
    pub fn from_process() -> Self {
        Environment::new().config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::ffi::OsStringExt;
    use std::path::Path;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::with_vars(Vec::<(String, String)>::new(), PathBuf::from("/"));

        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE"));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn test_non_unicode_values_are_kept_verbatim() {
        let raw = OsString::from_vec(vec![b'a', 0xff, b'b']);
        let env = Environment::with_vars(
            [(OsString::from("RAW"), raw.clone())],
            PathBuf::from("/"),
        );

        assert_eq!(env.get_var("RAW"), None);
        assert_eq!(env.get_var_os("RAW"), Some(raw.as_os_str()));
        assert_eq!(env.config().vars.get(OsStr::new("RAW")), Some(&raw));
    }

    #[test]
    fn test_non_unicode_path_is_still_searched() {
        let mut path = b"/first:/sec".to_vec();
        path.push(0xff);
        let env = Environment::with_vars(
            [(OsString::from("PATH"), OsString::from_vec(path))],
            PathBuf::from("/"),
        );

        let dirs = env.config().search_path;
        assert_eq!(dirs.dirs().len(), 2);
        assert_eq!(dirs.dirs()[0], Path::new("/first"));
    }

    #[test]
    fn test_config_follows_path_changes() {
        let mut env = Environment::with_vars(
            [("PATH", "/a:/b"), ("HOME", "/home/me")],
            PathBuf::from("/"),
        );
        let before = env.config();
        let expected = [Path::new("/a"), Path::new("/b")];
        assert_eq!(before.search_path.dirs(), expected);
        assert_eq!(before.home.as_deref(), Some(Path::new("/home/me")));

        env.set_var("PATH", "/c");
        assert_eq!(env.config().search_path.dirs(), [Path::new("/c")]);
    }

    #[test]
    fn test_config_without_path_has_no_directories() {
        let env = Environment::with_vars([("HOME", "/root")], PathBuf::from("/"));
        assert!(env.config().search_path.dirs().is_empty());
    }
}
