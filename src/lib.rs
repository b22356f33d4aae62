//! A minimal interactive command interpreter.
//!
//! The crate reads a command line, resolves the program through the search path and
//! runs it as a child process, optionally wiring its standard streams to files or to a
//! pipe shared with a second command. The process orchestration lives in a handful of
//! small modules:
//!
//! - [`search`] tries each `PATH` directory in order until a program image replaces
//!   the child;
//! - [`redirect`] describes and applies the stdin/stdout/stderr wiring of a child;
//! - [`external`] forks one child for one command;
//! - [`pipeline`] connects two children through a single pipe;
//! - [`jobs`] waits for foreground jobs and records background ones.
//!
//! [`Interpreter`] ties them together behind a line-oriented REPL.

mod builtin;
pub mod command;
pub mod env;
pub mod error;
pub mod external;
mod interpreter;
pub mod jobs;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod redirect;
pub mod search;
mod sys;

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
