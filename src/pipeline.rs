//! Two-stage pipelines: `first | second`.
//!
//! The parent creates one pipe and forks both stages. Each child duplicates the end
//! it needs onto stdin or stdout and closes both original descriptors; the parent
//! closes its own two ends as soon as both children exist. Until every copy of the
//! write end is gone the second stage would never see end-of-input.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::unistd::{Pid, pipe2};
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Result, ShellError};
use crate::external::ProcessLauncher;
use crate::jobs::{Job, wait_for_exit};
use crate::redirect::{OutputMode, Redirect, StreamWiring};

/// The two linked ends of one pipe, owned by the interpreter.
///
/// Both ends are opened close-on-exec, so that no unrelated child can carry a copy
/// past `execve`; the stages get theirs through `dup2`.
#[derive(Debug)]
pub struct PipeEndpoint {
    read: OwnedFd,
    write: OwnedFd,
}

impl PipeEndpoint {
    pub fn open() -> Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
        Ok(Self { read, write })
    }

    pub fn reader(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    pub fn writer(&self) -> BorrowedFd<'_> {
        self.write.as_fd()
    }
}

/// `first | second`, with optional file redirections on the outer ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    first: Command,
    second: Command,
    input: Option<PathBuf>,
    output: Option<(PathBuf, OutputMode)>,
}

impl Pipeline {
    pub fn new(first: Command, second: Command) -> Self {
        Self {
            first,
            second,
            input: None,
            output: None,
        }
    }

    /// Feed the first stage from a file.
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    /// Send the second stage's output to a file.
    pub fn output(mut self, path: impl Into<PathBuf>, mode: OutputMode) -> Self {
        self.output = Some((path.into(), mode));
        self
    }

    /// Start both stages and return them as one foreground job.
    ///
    /// If the second stage cannot be forked, the pipe is closed and the first stage
    /// is reaped before the error is returned.
    pub fn spawn(&self, launcher: &ProcessLauncher<'_>) -> Result<Job> {
        let pipe = PipeEndpoint::open()?;

        let first = {
            let wiring = StreamWiring::inherit()
                .stdin(self.input_redirect())
                .stdout(Redirect::Pipe(pipe.writer()))
                .release(pipe.reader())
                .release(pipe.writer());
            launcher.spawn(&self.first, &wiring)?
        };
        let second = {
            let wiring = StreamWiring::inherit()
                .stdin(Redirect::Pipe(pipe.reader()))
                .stdout(self.output_redirect())
                .release(pipe.reader())
                .release(pipe.writer());
            launcher.spawn(&self.second, &wiring)
        };
        drop(pipe);

        match second {
            Ok(second) => {
                debug!(%first, %second, "pipeline started");
                Ok(Job::foreground(vec![first, second]))
            }
            Err(err) => {
                warn!(%first, error = %err, "second stage failed to start");
                reap_quietly(first);
                Err(err)
            }
        }
    }

    fn input_redirect(&self) -> Redirect<'static> {
        match &self.input {
            Some(path) => Redirect::ReadFile(path.clone()),
            None => Redirect::Inherit,
        }
    }

    fn output_redirect(&self) -> Redirect<'static> {
        match &self.output {
            Some((path, mode)) => Redirect::WriteFile(path.clone(), *mode),
            None => Redirect::Inherit,
        }
    }
}

fn reap_quietly(pid: Pid) {
    if let Err(err) = wait_for_exit(pid) {
        warn!(%pid, error = %err, "could not reap first pipeline stage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ShellConfig;
    use crate::jobs::JobTracker;
    use crate::search::SearchPath;
    use std::fs;
    use std::time::{Duration, Instant};

    fn cat_binary() -> String {
        ["/bin/cat", "/usr/bin/cat"]
            .into_iter()
            .find(|p| std::path::Path::new(p).exists())
            .expect("cat not found")
            .to_string()
    }

    fn run(pipeline: &Pipeline, config: &ShellConfig) -> (i32, String) {
        let job = pipeline.spawn(&ProcessLauncher::new(config)).unwrap();
        assert_eq!(job.pids().len(), 2);
        let mut err = Vec::new();
        let code = JobTracker::new()
            .complete(job, &mut Vec::new(), &mut err)
            .unwrap();
        (code, String::from_utf8(err).unwrap())
    }

    #[test]
    fn test_every_byte_reaches_second_stage_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");

        // Well above the pipe buffer, so the stages really run concurrently.
        let pipeline = Pipeline::new(
            Command::new("seq", ["1", "50000"]),
            Command::new("cat", Vec::<String>::new()),
        )
        .output(&out, OutputMode::Truncate);
        let (code, err) = run(&pipeline, &ShellConfig::from_process());

        assert_eq!(code, 0);
        assert!(err.is_empty());
        let expected: String = (1..=50000).map(|n| format!("{n}\n")).collect();
        assert_eq!(fs::read_to_string(&out).unwrap(), expected);
    }

    #[test]
    fn test_second_stage_sees_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("count.txt");

        let started = Instant::now();
        let pipeline = Pipeline::new(
            Command::new("echo", ["one", "two"]),
            Command::new("wc", ["-w"]),
        )
        .output(&out, OutputMode::Truncate);
        let (code, _) = run(&pipeline, &ShellConfig::from_process());

        assert_eq!(code, 0);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "2");
    }

    #[test]
    fn test_missing_producer_still_closes_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let config = ShellConfig::new(SearchPath::new([dir.path()]));

        // The consumer is named by path since the search path holds nothing.
        let pipeline = Pipeline::new(
            Command::new("no-such-producer", Vec::<String>::new()),
            Command::new(cat_binary(), Vec::<String>::new()),
        )
        .output(&out, OutputMode::Truncate);
        let (code, err) = run(&pipeline, &config);

        assert_eq!(code, 1);
        assert_eq!(err, "Program terminated with exit code: 1.\n");
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_input_file_feeds_first_stage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let out = dir.path().join("out.txt");
        fs::write(&input, "banana\napple\ncherry\n").unwrap();

        let pipeline = Pipeline::new(
            Command::new("cat", Vec::<String>::new()),
            Command::new("sort", Vec::<String>::new()),
        )
        .input(&input)
        .output(&out, OutputMode::Truncate);
        let (code, _) = run(&pipeline, &ShellConfig::from_process());

        assert_eq!(code, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "apple\nbanana\ncherry\n");
    }
}
