mod cli;
mod live;

use clap::Parser;

use crate::cli::{Cli, Command, RunConfig};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Run(args) => live::run(RunConfig::try_from(args)?),
        Command::Formats(args) => live::list_formats(args),
    }
}
