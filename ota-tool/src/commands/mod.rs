mod inspect;
mod ledger;
mod stamp;

use crate::{Commands, config::Config};

pub fn process(config: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stamp(args) => stamp::process(config, args),
        Commands::Inspect { input_path } => inspect::process(config, &input_path),
        Commands::Ledger { input_path } => ledger::process(config, &input_path),
    }
}
