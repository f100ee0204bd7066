mod bindings;
mod cli;
mod frames;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    let config = cli.config.as_deref();
    match cli.command {
        Command::Process(args) => run::process(config, args),
        Command::Check(args) => run::check(config, args),
        Command::Where => run::where_paths(config),
        Command::Params => run::list_params(),
    }
}
