use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use tracing::debug;

use crate::command::{Command, ExitCode};
use crate::env::Environment;

/// Commands that must run inside the interpreter process.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process. Only state the interpreter owns
/// (working directory, exit flag) is touched here.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

/// Run `command` if it names a builtin; `None` means it is an external program.
pub(crate) fn run_builtin(
    command: &Command,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    env: &mut Environment,
) -> Option<Result<ExitCode>> {
    try_run::<Cd>(command, stdout, stderr, env)
        .or_else(|| try_run::<Exit>(command, stdout, stderr, env))
}

fn try_run<T: BuiltinCommand>(
    command: &Command,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    env: &mut Environment,
) -> Option<Result<ExitCode>> {
    if command.name() != T::name() {
        return None;
    }
    let args: Vec<&str> = command.args().iter().map(String::as_str).collect();
    debug!(builtin = T::name(), ?args, "running builtin");

    Some(match T::from_args(&[T::name()], &args) {
        Ok(cmd) => match cmd.execute(stdout, env) {
            Ok(code) => Ok(code),
            Err(e) => writeln!(stderr, "{e:#}").map(|_| 1).map_err(Into::into),
        },
        // `--help` is a successful early exit; a usage error is not.
        Err(EarlyExit { output, status }) => match status {
            Ok(()) => stdout.write_all(output.as_bytes()).map(|_| 0),
            Err(()) => stderr.write_all(output.as_bytes()).map(|_| 1),
        }
        .map_err(Into::into),
    })
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to, absolute or relative to the current directory;
    /// defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.config().home {
                Some(home) => home,
                None => anyhow::bail!("cd: HOME not set"),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, default = "0")]
    /// status to exit with.
    pub code: ExitCode,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(self.code)
    }
}
