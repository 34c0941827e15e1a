// Configuration inspection

use anyhow::Result;
use clap::Subcommand;

use fleet_core::FleetConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
}

pub fn handle_config_command(command: ConfigCommand, config: &FleetConfig) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}
