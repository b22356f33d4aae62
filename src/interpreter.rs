use std::io::{self, Write};

use nix::unistd::Pid;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, error, info};

use crate::builtin::run_builtin;
use crate::command::ExitCode;
use crate::env::Environment;
use crate::error::ShellError;
use crate::external::ProcessLauncher;
use crate::jobs::{Job, JobTracker};
use crate::parser::{Line, SimpleCommand, parse_line};
use crate::redirect::{Redirect, StreamWiring};

const DEFAULT_PROMPT: &str = "$ ";

/// Exit status for a line that could not be parsed.
const SYNTAX_ERROR_STATUS: ExitCode = 2;

/// A minimal shell-like interpreter: builtins run in-process, everything else is
/// forked as a child process.
///
/// The interpreter owns the [`Environment`] and the [`JobTracker`] that remembers
/// background jobs between lines.
///
/// Example
/// ```
/// use minish::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh
///     .execute_line("true", &mut std::io::stdout(), &mut std::io::stderr())
///     .unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    jobs: JobTracker,
    last_status: ExitCode,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Environment::new())
    }
}

impl Interpreter {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            jobs: JobTracker::new(),
            last_status: 0,
        }
    }

    /// True once the `exit` builtin has run.
    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Status of the most recently executed line.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    /// Parse and run one line of input.
    ///
    /// Messages produced by the interpreter itself (exit-code reports, parse errors,
    /// background job announcements) go to `stdout`/`stderr`; child processes write
    /// to the descriptors they inherited. Failures of a single command are reported
    /// and turned into a nonzero status; only errors writing to the given streams are
    /// returned as `Err`.
    pub fn execute_line(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> anyhow::Result<ExitCode> {
        let status = match self.dispatch(line, stdout, stderr) {
            Ok(status) => status,
            Err(err) => match err.downcast::<ShellError>() {
                Ok(ShellError::Parse(err)) => {
                    debug!(%line, error = %err, "rejected input line");
                    writeln!(stderr, "minish: {err}")?;
                    SYNTAX_ERROR_STATUS
                }
                Ok(err @ ShellError::Spawn(_)) => {
                    writeln!(stderr, "{err}")?;
                    1
                }
                Ok(err) => {
                    writeln!(stderr, "minish: {err}")?;
                    1
                }
                Err(other) => return Err(other),
            },
        };
        self.last_status = status;
        Ok(status)
    }

    fn dispatch(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> anyhow::Result<ExitCode> {
        let job = match parse_line(line).map_err(ShellError::from)? {
            Line::Empty => return Ok(0),
            Line::Simple(simple) => {
                if let Some(result) = run_builtin(&simple.command, stdout, stderr, &mut self.env) {
                    return result;
                }
                self.spawn_simple(&simple)?
            }
            Line::Pipeline(pipeline) => {
                // Read per line so that a changed `PATH` is seen by the next command.
                let config = self.env.config();
                pipeline.spawn(&ProcessLauncher::new(&config))?
            }
        };
        Ok(self.jobs.complete(job, stdout, stderr)?)
    }

    fn spawn_simple(&self, simple: &SimpleCommand) -> Result<Job, ShellError> {
        let config = self.env.config();
        let mut wiring = StreamWiring::inherit();
        if let Some(path) = &simple.input {
            wiring = wiring.stdin(Redirect::ReadFile(path.clone()));
        }
        if let Some((path, mode)) = &simple.output {
            wiring = wiring.stdout(Redirect::WriteFile(path.clone(), *mode));
        }

        let pid = ProcessLauncher::new(&config).spawn(&simple.command, &wiring)?;
        Ok(if simple.background {
            Job::background(vec![pid])
        } else {
            Job::foreground(vec![pid])
        })
    }

    /// Background pids that have not been reaped yet.
    pub fn background_jobs(&self) -> &[Pid] {
        self.jobs.pending()
    }

    /// Read-eval-print loop on the terminal.
    ///
    /// Returns the status of the last executed line, for use as the process exit code.
    pub fn repl(&mut self) -> rustyline::Result<ExitCode> {
        let mut rl = DefaultEditor::new()?;

        while !self.env.should_exit {
            self.jobs.reap();

            let prompt = self.env.get_var("PS1").unwrap_or(DEFAULT_PROMPT);
            let prompt = prompt.to_string();
            match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    let result = self.execute_line(&line, &mut io::stdout(), &mut io::stderr());
                    if let Err(err) = result {
                        error!(error = %err, "could not report command result");
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        info!(status = self.last_status, "leaving input loop");
        Ok(self.last_status)
    }
}
