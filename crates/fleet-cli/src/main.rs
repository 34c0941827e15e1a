//! Operator tooling for the fleet control plane
//!
//! Inspects allocation policy tables and dry-runs identifier allocation
//! against them without touching a live fleet.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{
    allocate::{self, AllocateArgs},
    common,
    config::{handle_config_command, ConfigCommand},
    policy::{handle_policy_command, PolicyCommand},
};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Fleet control plane - policy and allocation tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path; `FLEET_*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocation policy tables
    #[command(subcommand)]
    Policy(PolicyCommand),

    /// Pick or validate an identifier against a hypothetical host
    Allocate(AllocateArgs),

    /// Effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = common::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Policy(cmd) => handle_policy_command(cmd, &config),
        Commands::Allocate(args) => allocate::run(&args, &config),
        Commands::Config(cmd) => handle_config_command(cmd, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definitions_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn used_values_accept_a_comma_list() {
        let cli = Cli::try_parse_from([
            "fleetctl", "allocate", "--os", "tiny-os", "--kind", "uid", "--name", "svc1",
            "--used", "500,501,503",
        ])
        .unwrap();
        let Commands::Allocate(args) = cli.command else {
            panic!("expected allocate");
        };
        assert_eq!(args.used, vec![500, 501, 503]);
        assert_eq!(args.id, None);
    }
}
