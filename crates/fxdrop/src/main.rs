mod cli;
mod config;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Render(args)) => run::render(&cli.run, args),
        Some(Command::Params(params)) => run::params(params.action),
        None => run::run(cli.run),
    }
}
