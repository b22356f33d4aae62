use std::io;

use anyhow::Result;
use argh::FromArgs;

use minish::Interpreter;
use minish::logging::init_logging;

#[derive(FromArgs)]
/// A minimal interactive command interpreter.
struct Options {
    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status.
    command: Option<String>,

    #[argh(option)]
    /// log filter, e.g. "debug" or "minish::jobs=trace"; overrides $MINISH_LOG.
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let options: Options = argh::from_env();
    init_logging(options.log_level.as_deref())?;

    let mut sh = Interpreter::default();
    let status = match options.command {
        Some(line) => sh.execute_line(&line, &mut io::stdout(), &mut io::stderr())?,
        None => sh.repl()?,
    };
    std::process::exit(status)
}
