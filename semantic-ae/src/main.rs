use anyhow::Result;
use clap::Parser;
use semantic_ae::cli::{describe, push, receptive_field, Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Describe(args) => {
            describe::run(args)?;
        }
        Commands::ReceptiveFields(args) => {
            receptive_field::run(args)?;
        }
        Commands::Push(args) => {
            push::run(args)?;
        }
    }

    Ok(())
}
