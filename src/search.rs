//! Program resolution through the search path.
//!
//! Resolution and launch are fused: every candidate `dir/name` is handed straight to
//! `execve`, and only a failed attempt moves on to the next directory. A successful
//! attempt never returns because the process image has been replaced. This matches
//! shell semantics where `PATH` and the directories it names can change between two
//! commands, so nothing is looked up ahead of time or cached.

use std::ffi::{CStr, CString, OsStr, OsString, c_char};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

use nix::errno::Errno;
use nix::libc;
use tracing::debug;

use crate::command::Command;
use crate::error::{Result, ShellError};
use crate::sys;

/// Ordered list of directories searched for bare command names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a colon-delimited `PATH` value.
    ///
    /// An empty entry stands for the current directory, as in POSIX shells.
    pub fn parse(value: impl AsRef<OsStr>) -> Self {
        let value = value.as_ref().as_bytes();
        if value.is_empty() {
            return Self::default();
        }
        Self::new(value.split(|&b| b == b':').map(entry_dir))
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Paths to try, in order, for `name`.
    ///
    /// A name containing a `/` is used as-is and never searched for.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        if name.contains('/') {
            return vec![PathBuf::from(name)];
        }
        self.dirs.iter().map(|dir| dir.join(name)).collect()
    }
}

fn entry_dir(entry: &[u8]) -> PathBuf {
    if entry.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(OsStr::from_bytes(entry))
    }
}

/// Outcome of one failed launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Nothing launchable lives at this path.
    NotFound,
    /// Something exists at this path but the kernel refused to run it.
    Refused(Errno),
}

impl Attempt {
    fn from_errno(errno: Errno) -> Self {
        match errno {
            Errno::ENOENT | Errno::ENOTDIR => Attempt::NotFound,
            other => Attempt::Refused(other),
        }
    }
}

/// Everything `execve` needs for one command, converted to C strings up front.
///
/// A plan is built in the parent; the child only walks it, which keeps the code that
/// runs between `fork` and `execve` free of allocations.
pub struct ExecPlan {
    label: Vec<u8>,
    candidates: Vec<CString>,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    _envp: Vec<CString>,
    envp_ptrs: Vec<*const c_char>,
}

impl ExecPlan {
    pub fn new<'a, I>(command: &Command, search_path: &SearchPath, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a OsString, &'a OsString)>,
    {
        let candidates = search_path
            .candidates(command.name())
            .iter()
            .map(|path| path_to_cstring(path))
            .collect::<Result<Vec<_>>>()?;
        let argv: Vec<CString> = command.argv().map(to_cstring).collect::<Result<_>>()?;
        let envp = vars
            .into_iter()
            .map(|(key, value)| env_entry(key, value))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            command = command.name(),
            candidates = candidates.len(),
            "planned program resolution"
        );
        Ok(Self {
            label: command.name().as_bytes().to_vec(),
            argv_ptrs: null_terminated(&argv),
            envp_ptrs: null_terminated(&envp),
            candidates,
            _argv: argv,
            _envp: envp,
        })
    }

    pub fn candidates(&self) -> &[CString] {
        &self.candidates
    }

    /// Try to replace the current process image with `candidate`.
    ///
    /// Returns only when the attempt failed.
    pub fn attempt(&self, candidate: &CStr) -> Attempt {
        // SAFETY: `argv_ptrs` and `envp_ptrs` are NULL-terminated arrays pointing into
        // C strings owned by `self`, which outlives the call.
        unsafe {
            libc::execve(
                candidate.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
        }
        Attempt::from_errno(Errno::last())
    }

    /// Walk the candidates in order. Returns the last refusal, if any, once every
    /// candidate has failed.
    pub fn exec(&self) -> Option<Errno> {
        let mut refused = None;
        for candidate in &self.candidates {
            match self.attempt(candidate) {
                Attempt::NotFound => continue,
                Attempt::Refused(errno) => refused = Some(errno),
            }
        }
        refused
    }

    /// Run the command or report why it could not be run and exit with status 1.
    ///
    /// Only meant for a freshly forked child.
    pub(crate) fn exec_or_exit(&self) -> ! {
        match self.exec() {
            None => {
                sys::write_stderr(&self.label);
                sys::write_stderr(b": command not found\n");
            }
            Some(errno) => {
                sys::write_stderr(&self.label);
                sys::write_stderr(b": ");
                sys::write_stderr(errno.desc().as_bytes());
                sys::write_stderr(b"\n");
            }
        }
        sys::exit_child(1)
    }
}

fn to_cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| ShellError::InvalidArgument(value.to_string()))
}

fn env_entry(key: &OsStr, value: &OsStr) -> Result<CString> {
    let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
    entry.extend_from_slice(key.as_bytes());
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());
    CString::new(entry).map_err(|_| {
        let name = key.to_string_lossy().into_owned();
        ShellError::InvalidArgument(name)
    })
}

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ShellError::InvalidArgument(path.display().to_string()))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::os::unix::ffi::OsStringExt;

    fn plan(cmd: &Command, search_path: SearchPath) -> Result<ExecPlan> {
        ExecPlan::new(cmd, &search_path, &BTreeMap::<OsString, OsString>::new())
    }

    #[test]
    fn test_parse_keeps_order() {
        let path = SearchPath::parse("/usr/local/bin:/usr/bin:/bin");
        assert_eq!(
            path.dirs(),
            [
                Path::new("/usr/local/bin"),
                Path::new("/usr/bin"),
                Path::new("/bin")
            ]
        );
    }

    #[test]
    fn test_parse_empty_entry_is_current_dir() {
        let path = SearchPath::parse("/bin::/usr/bin:");
        assert_eq!(
            path.dirs(),
            [
                Path::new("/bin"),
                Path::new("."),
                Path::new("/usr/bin"),
                Path::new(".")
            ]
        );
    }

    #[test]
    fn test_parse_empty_value_has_no_dirs() {
        assert!(SearchPath::parse("").dirs().is_empty());
    }

    #[test]
    fn test_candidates_join_each_directory() {
        let path = SearchPath::new(["/first", "/second"]);
        assert_eq!(
            path.candidates("tool"),
            [PathBuf::from("/first/tool"), PathBuf::from("/second/tool")]
        );
    }

    #[test]
    fn test_candidates_with_slash_are_not_searched() {
        let path = SearchPath::new(["/first", "/second"]);
        assert_eq!(path.candidates("./tool"), [PathBuf::from("./tool")]);
        assert_eq!(path.candidates("/bin/sh"), [PathBuf::from("/bin/sh")]);
    }

    #[test]
    fn test_plan_rejects_nul_bytes() {
        let cmd = Command::new("echo", ["a\0b"]);
        let err = plan(&cmd, SearchPath::new(["/bin"]))
            .err()
            .expect("NUL byte must be rejected");
        assert!(matches!(err, ShellError::InvalidArgument(_)));
    }

    #[test]
    fn test_plan_candidates_follow_search_order() {
        let cmd = Command::new("ls", ["-l"]);
        let plan = plan(&cmd, SearchPath::new(["/a", "/b"])).unwrap();
        let names: Vec<_> = plan
            .candidates()
            .iter()
            .map(|c| c.to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["/a/ls", "/b/ls"]);
    }

    #[test]
    fn test_plan_passes_environment_bytes_unchanged() {
        let mut vars = BTreeMap::new();
        vars.insert(OsString::from("RAW"), OsString::from_vec(vec![b'x', 0xff]));
        vars.insert(OsString::from("PLAIN"), OsString::from("value"));

        let cmd = Command::new("env", Vec::<String>::new());
        let plan = ExecPlan::new(&cmd, &SearchPath::default(), &vars).unwrap();
        let envp: Vec<&[u8]> = plan._envp.iter().map(|e| e.as_bytes()).collect();

        assert_eq!(envp, [&b"PLAIN=value"[..], &b"RAW=x\xff"[..]]);
        assert_eq!(plan.envp_ptrs.len(), 3);
        assert!(plan.envp_ptrs[2].is_null());
    }

    #[test]
    fn test_attempt_missing_program_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = Command::new("missing-program", Vec::<String>::new());
        let plan = plan(&cmd, SearchPath::new([dir.path()])).unwrap();
        // execve fails without replacing the test process.
        assert_eq!(plan.attempt(&plan.candidates()[0]), Attempt::NotFound);
        assert_eq!(plan.exec(), None);
    }

    #[test]
    fn test_attempt_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let cmd = Command::new("subdir", Vec::<String>::new());
        let plan = plan(&cmd, SearchPath::new([dir.path()])).unwrap();
        assert_eq!(plan.exec(), Some(Errno::EACCES));
    }
}
