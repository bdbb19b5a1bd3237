use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use stakepilot_deploy::{AgentType, Chain};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "stakepilot")]
#[command(
    author,
    version,
    about = "Check and start Pearl staking agents through the operate middleware"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "STAKEPILOT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Stakepilot.toml file, or to a directory containing one.
    ///
    /// If not provided, the built-in defaults are used, overridden by STAKEPILOT_* variables.
    #[arg(long, alias = "conf", global = true, env = "STAKEPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The agent to operate on.
    #[arg(short, long, global = true, env = "STAKEPILOT_AGENT", default_value_t = AgentType::PredictTrader)]
    pub agent: AgentType,

    /// The staking program the service is created in (e.g. pearl_beta).
    #[arg(long, global = true, env = "STAKEPILOT_STAKING_PROGRAM")]
    pub staking_program: Option<String>,

    /// The service configuration id of an existing service.
    ///
    /// If not provided, starting the agent creates a new service.
    #[arg(long, global = true, env = "STAKEPILOT_SERVICE")]
    pub service: Option<String>,

    /// The agent was already funded through the initial funding flow.
    #[arg(long, global = true, env = "STAKEPILOT_INITIALLY_FUNDED", default_value_t = false)]
    pub initially_funded: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the agent's readiness, master Safes and balances.
    Status,

    /// Evaluate readiness and start the agent.
    Start,

    /// Manage master Safes.
    #[command(subcommand)]
    Safe(SafeCommand),

    /// Manage the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum SafeCommand {
    /// Make sure a master Safe exists on the agent's home chain.
    Ensure,

    /// Replace the backup owner of a master Safe.
    SetBackup {
        /// The new backup owner.
        address: Address,

        /// The chain of the Safe. Defaults to the agent's home chain.
        #[arg(long)]
        chain: Option<Chain>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write the default configuration to Stakepilot.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}
