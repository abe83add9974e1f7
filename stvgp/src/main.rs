use anyhow::Result;
use clap::Parser;
use stvgp::cli::{Cli, Commands, fit};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Fit(args) => {
            fit::run(args)?;
        }
    }

    Ok(())
}
