//! Standard stream wiring for a child process.
//!
//! A [`StreamWiring`] is built in the parent and describes where the child's
//! stdin, stdout and stderr should point. It is turned into a [`PreparedWiring`]
//! before `fork` so that the child can apply it with nothing but `open`, `dup2` and
//! `close`. The parent's own descriptors are never touched.

use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl, open};
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};

use crate::error::Result;
use crate::search::path_to_cstring;
use crate::sys;

/// How an output redirection treats an existing file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// `>`: create the file, or cut it to zero length.
    #[default]
    Truncate,
    /// `>>`: create the file, or write after its current end.
    Append,
}

/// Where one standard stream of a child is connected.
#[derive(Debug, Clone, Default)]
pub enum Redirect<'fd> {
    /// Keep the descriptor inherited from the interpreter.
    #[default]
    Inherit,
    /// Read from an existing file.
    ReadFile(PathBuf),
    /// Write to a file, creating it if needed.
    WriteFile(PathBuf, OutputMode),
    /// Use one end of a pipe owned by the caller.
    Pipe(BorrowedFd<'fd>),
}

/// The (stdin, stdout, stderr) directives for one child.
///
/// `release` lists descriptors the child must close once duplication is done; a
/// pipeline stage lists both pipe ends here so that no stray copy of the write end
/// keeps the reader from seeing end-of-stream.
#[derive(Debug, Clone, Default)]
pub struct StreamWiring<'fd> {
    pub stdin: Redirect<'fd>,
    pub stdout: Redirect<'fd>,
    pub stderr: Redirect<'fd>,
    release: Vec<BorrowedFd<'fd>>,
}

impl<'fd> StreamWiring<'fd> {
    /// Every stream inherited from the interpreter.
    pub fn inherit() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, redirect: Redirect<'fd>) -> Self {
        self.stdin = redirect;
        self
    }

    pub fn stdout(mut self, redirect: Redirect<'fd>) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn stderr(mut self, redirect: Redirect<'fd>) -> Self {
        self.stderr = redirect;
        self
    }

    /// Close `fd` in the child after the streams are wired.
    pub fn release(mut self, fd: BorrowedFd<'fd>) -> Self {
        self.release.push(fd);
        self
    }

    /// Convert paths to C strings and fix the open flags, ahead of `fork`.
    pub fn prepare(&self) -> Result<PreparedWiring> {
        let mut slots = Vec::with_capacity(3);
        // stderr goes first so that a failing stdin/stdout target is reported there.
        for (target, redirect) in [
            (libc::STDERR_FILENO, &self.stderr),
            (libc::STDIN_FILENO, &self.stdin),
            (libc::STDOUT_FILENO, &self.stdout),
        ] {
            let source = match redirect {
                Redirect::Inherit => continue,
                Redirect::ReadFile(path) => Source::File {
                    path: path_to_cstring(path)?,
                    flags: OFlag::O_RDONLY,
                    label: path.display().to_string().into_bytes(),
                },
                Redirect::WriteFile(path, mode) => Source::File {
                    path: path_to_cstring(path)?,
                    flags: output_flags(*mode),
                    label: path.display().to_string().into_bytes(),
                },
                Redirect::Pipe(fd) => Source::Fd(fd.as_raw_fd()),
            };
            slots.push(Slot { target, source });
        }
        Ok(PreparedWiring {
            slots,
            release: self.release.iter().map(AsRawFd::as_raw_fd).collect(),
        })
    }
}

fn output_flags(mode: OutputMode) -> OFlag {
    let base = OFlag::O_WRONLY | OFlag::O_CREAT;
    match mode {
        OutputMode::Truncate => base | OFlag::O_TRUNC,
        OutputMode::Append => base | OFlag::O_APPEND,
    }
}

#[derive(Debug)]
enum Source {
    File {
        path: CString,
        flags: OFlag,
        label: Vec<u8>,
    },
    Fd(RawFd),
}

#[derive(Debug)]
struct Slot {
    target: RawFd,
    source: Source,
}

/// A [`StreamWiring`] reduced to raw descriptors and C strings.
#[derive(Debug)]
pub struct PreparedWiring {
    slots: Vec<Slot>,
    release: Vec<RawFd>,
}

/// A redirection that could not be applied in the child.
#[derive(Debug)]
pub struct RedirectFailure<'a> {
    label: &'a [u8],
    errno: Errno,
}

impl RedirectFailure<'_> {
    pub fn errno(&self) -> Errno {
        self.errno
    }

    /// Write `<target>: <reason>` to the child's current stderr.
    pub(crate) fn report(&self) {
        sys::write_stderr(self.label);
        sys::write_stderr(b": ");
        sys::write_stderr(self.errno.desc().as_bytes());
        sys::write_stderr(b"\n");
    }
}

impl PreparedWiring {
    /// Rewire the standard descriptors of the calling process.
    ///
    /// Meant to run in a forked child; stops at the first failure.
    pub(crate) fn apply(&self) -> std::result::Result<(), RedirectFailure<'_>> {
        for slot in &self.slots {
            match &slot.source {
                Source::File { path, flags, label } => {
                    let fd = open(path.as_c_str(), *flags, Mode::from_bits_truncate(0o644))
                        .map_err(|errno| RedirectFailure { label, errno })?;
                    if fd != slot.target {
                        dup2(fd, slot.target).map_err(|errno| RedirectFailure { label, errno })?;
                        let _ = close(fd);
                    }
                }
                Source::Fd(fd) if *fd == slot.target => {
                    // Already in place; only the close-on-exec flag has to go.
                    fcntl(*fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(|errno| {
                        RedirectFailure {
                            label: b"fcntl",
                            errno,
                        }
                    })?;
                }
                Source::Fd(fd) => {
                    dup2(*fd, slot.target).map_err(|errno| RedirectFailure {
                        label: b"dup2",
                        errno,
                    })?;
                }
            }
        }
        for fd in &self.release {
            if !self.slots.iter().any(|slot| slot.target == *fd) {
                let _ = close(*fd);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::env::ShellConfig;
    use crate::external::ProcessLauncher;
    use crate::jobs::wait_for_exit;
    use std::fs;

    fn run(command: Command, wiring: &StreamWiring<'_>) -> i32 {
        let config = ShellConfig::from_process();
        let pid = ProcessLauncher::new(&config)
            .spawn(&command, wiring)
            .unwrap();
        wait_for_exit(pid).unwrap()
    }

    #[test]
    fn test_prepare_skips_inherited_streams() {
        let target = Redirect::WriteFile(PathBuf::from("/tmp/out.txt"), OutputMode::Truncate);
        let prepared = StreamWiring::inherit().stdout(target).prepare().unwrap();
        assert_eq!(prepared.slots.len(), 1);
        assert_eq!(prepared.slots[0].target, libc::STDOUT_FILENO);
    }

    #[test]
    fn test_output_flags() {
        let truncate = output_flags(OutputMode::Truncate);
        let append = output_flags(OutputMode::Append);
        assert!(truncate.contains(OFlag::O_TRUNC | OFlag::O_CREAT));
        assert!(append.contains(OFlag::O_APPEND | OFlag::O_CREAT));
        assert!(!append.contains(OFlag::O_TRUNC));
    }

    #[test]
    fn test_output_redirect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("created.txt");

        let target = Redirect::WriteFile(out.clone(), OutputMode::Truncate);
        let wiring = StreamWiring::inherit().stdout(target);
        let code = run(Command::new("echo", ["hello", "world"]), &wiring);

        assert_eq!(code, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello world\n");
    }

    #[test]
    fn test_output_redirect_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("existing.txt");
        fs::write(&out, "a much longer line that must disappear entirely\n").unwrap();

        let target = Redirect::WriteFile(out.clone(), OutputMode::Truncate);
        let wiring = StreamWiring::inherit().stdout(target);
        let code = run(Command::new("echo", ["short"]), &wiring);

        assert_eq!(code, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "short\n");
    }

    #[test]
    fn test_append_redirect_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("log.txt");
        fs::write(&out, "first\n").unwrap();

        let target = Redirect::WriteFile(out.clone(), OutputMode::Append);
        let wiring = StreamWiring::inherit().stdout(target);
        assert_eq!(run(Command::new("echo", ["second"]), &wiring), 0);

        assert_eq!(fs::read_to_string(&out).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_input_redirect_feeds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let out = dir.path().join("out.txt");
        fs::write(&input, "line one\nline two\n").unwrap();

        let wiring = StreamWiring::inherit()
            .stdin(Redirect::ReadFile(input))
            .stdout(Redirect::WriteFile(out.clone(), OutputMode::Truncate));
        assert_eq!(run(Command::new("cat", Vec::<String>::new()), &wiring), 0);

        assert_eq!(fs::read_to_string(&out).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn test_failed_open_carries_errno() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.txt");

        // Opening fails before any descriptor is touched, so this is safe in-process.
        let prepared = StreamWiring::inherit()
            .stdin(Redirect::ReadFile(missing.clone()))
            .prepare()
            .unwrap();
        let failure = prepared.apply().unwrap_err();

        assert_eq!(failure.errno(), Errno::ENOENT);
        assert_eq!(failure.label, missing.display().to_string().as_bytes());
    }

    #[test]
    fn test_missing_input_aborts_child_before_exec() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.txt");
        let out = dir.path().join("out.txt");
        let errors = dir.path().join("err.txt");

        let wiring = StreamWiring::inherit()
            .stderr(Redirect::WriteFile(errors.clone(), OutputMode::Truncate))
            .stdin(Redirect::ReadFile(missing.clone()))
            .stdout(Redirect::WriteFile(out.clone(), OutputMode::Truncate));
        let code = run(Command::new("echo", ["never printed"]), &wiring);

        assert_eq!(code, 1);
        let reported = fs::read_to_string(&errors).unwrap();
        assert_eq!(
            reported,
            format!("{}: {}\n", missing.display(), Errno::ENOENT.desc())
        );
        // stdin is wired first, so stdout was never opened.
        assert!(!out.exists());
    }
}
