use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, warn};

use crate::command::Command;
use crate::env::ShellConfig;
use crate::error::{Result, ShellError};
use crate::redirect::{PreparedWiring, StreamWiring};
use crate::search::ExecPlan;
use crate::sys;

/// Launches commands that are not builtins as child processes.
///
/// The launcher only forks; waiting is left to [`crate::jobs::JobTracker`] so that the
/// same spawn path serves foreground, background and pipeline jobs.
pub struct ProcessLauncher<'cfg> {
    config: &'cfg ShellConfig,
}

impl<'cfg> ProcessLauncher<'cfg> {
    pub fn new(config: &'cfg ShellConfig) -> Self {
        Self { config }
    }

    /// Fork a child that wires its streams and then becomes `command`.
    ///
    /// Everything the child needs is prepared before the fork. Failures inside the
    /// child (unopenable redirection, no runnable program) are reported on the
    /// child's stderr and end the child with status 1; the caller sees them only
    /// through the exit status.
    pub fn spawn(&self, command: &Command, wiring: &StreamWiring<'_>) -> Result<Pid> {
        let plan = ExecPlan::new(command, &self.config.search_path, &self.config.vars)?;
        let wiring = wiring.prepare()?;

        // SAFETY: the child branch only runs `run_child`, which is restricted to
        // async-signal-safe calls until `execve` or `_exit`.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = %child, command = command.name(), "spawned child");
                Ok(child)
            }
            Ok(ForkResult::Child) => run_child(&plan, &wiring),
            Err(errno) => {
                warn!(command = command.name(), %errno, "fork failed");
                Err(ShellError::Spawn(errno))
            }
        }
    }
}

fn run_child(plan: &ExecPlan, wiring: &PreparedWiring) -> ! {
    sys::restore_default_signals();
    if let Err(failure) = wiring.apply() {
        failure.report();
        sys::exit_child(1);
    }
    plan.exec_or_exit()
}
