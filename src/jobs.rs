//! Completion tracking for spawned processes.
//!
//! A foreground job blocks the interpreter until every member has been reaped. A
//! background job is announced with its pid and left running; its exit status is
//! collected later by [`JobTracker::reap`] without blocking.

use std::io::Write;

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::command::ExitCode;
use crate::error::{Result, ShellError};

/// Processes started for one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pids: Vec<Pid>,
    background: bool,
}

impl Job {
    pub fn foreground(pids: Vec<Pid>) -> Self {
        Self {
            pids,
            background: false,
        }
    }

    pub fn background(pids: Vec<Pid>) -> Self {
        Self {
            pids,
            background: true,
        }
    }

    pub fn pids(&self) -> &[Pid] {
        &self.pids
    }

    pub fn is_background(&self) -> bool {
        self.background
    }
}

#[derive(Debug, Default)]
pub struct JobTracker {
    background: Vec<Pid>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a freshly spawned job over to the tracker.
    ///
    /// Foreground jobs are waited for and every nonzero exit is written to `stderr`
    /// as `Program terminated with exit code: N.`; the first nonzero code becomes the
    /// job's status. If some member cannot be waited for, the others are still
    /// reaped and the first such error is returned.
    ///
    /// Background jobs are announced on `stdout` as `[1] <pid>` and report status 0
    /// right away.
    pub fn complete(
        &mut self,
        job: Job,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        if job.is_background() {
            for pid in &job.pids {
                writeln!(stdout, "[1] {pid}")?;
                debug!(%pid, "running in background");
            }
            stdout.flush()?;
            self.background.extend(job.pids);
            return Ok(0);
        }

        // Every member is reaped before anything is reported.
        let results: Vec<_> = job.pids.into_iter().map(wait_for_exit).collect();

        let mut status = 0;
        let mut failure = None;
        for result in results {
            match result {
                Ok(0) => {}
                Ok(code) => {
                    writeln!(
                        stderr,
                        "Program terminated with exit code: {}.",
                        code & 0xff
                    )?;
                    if status == 0 {
                        status = code;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "lost track of a job member");
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(status),
        }
    }

    /// Collect background jobs that have finished, without blocking.
    ///
    /// Returns the pids that were reaped.
    pub fn reap(&mut self) -> Vec<Pid> {
        let mut reaped = Vec::new();
        self.background.retain(|&pid| match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => true,
            Ok(status) => {
                info!(%pid, code = exit_code(status), "background job finished");
                reaped.push(pid);
                false
            }
            Err(errno) => {
                debug!(%pid, %errno, "dropping background job");
                reaped.push(pid);
                false
            }
        });
        reaped
    }

    /// Background pids not reaped yet.
    pub fn pending(&self) -> &[Pid] {
        &self.background
    }
}

/// Block until `pid` terminates and return its decoded exit code.
pub fn wait_for_exit(pid: Pid) -> Result<ExitCode> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                debug!(%pid, ?status, "child terminated");
                return Ok(exit_code(status));
            }
            // Stop/continue notifications are not requested; anything else is noise.
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(source) => return Err(ShellError::Wait { pid, source }),
        }
    }
}

/// Map a wait status onto a shell-style exit code.
///
/// A process killed by a signal reports `128 + signal`, so that it still counts as a
/// nonzero exit.
pub fn exit_code(status: WaitStatus) -> ExitCode {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => 255,
    }
}
