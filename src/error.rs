//! Errors raised on the parent side of process orchestration.
//!
//! Failures that happen inside a forked child (a missing program, a redirection
//! target that cannot be opened) never surface here: the child reports them on its
//! own error stream and exits with status 1, which the parent observes as an exit
//! code.

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::parser::ParseError;

#[derive(Error, Debug)]
pub enum ShellError {
    /// The OS refused to create a new process.
    #[error("Fork has failed with error code: {}", errno_code(.0))]
    Spawn(#[source] Errno),

    #[error("failed to create pipe: {0}")]
    Pipe(#[source] Errno),

    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },

    /// A string handed to `execve` or `open` contains an interior NUL byte.
    #[error("invalid argument {0:?}: contains a NUL byte")]
    InvalidArgument(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;

fn errno_code(errno: &Errno) -> i32 {
    *errno as i32
}
