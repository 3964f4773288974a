//! novajoin deployment verification
//!
//! Checks that a TripleO deployment using novajoin left IPA in the expected
//! state: nodes enrolled with keytabs, service principals created for what
//! each node advertises in its Nova metadata, and certificates tracked by
//! certmonger on the overcloud.

pub mod commands;
pub mod compute;
pub mod config;
pub mod error;
pub mod identity;
pub mod literal;
pub mod remote;
pub mod report;
pub mod services;
pub mod suite;
pub mod verify;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{VerifyConfig, CONFIG_ENV};

/// novajoin-verify - Verify IPA enrollment of a TripleO deployment
#[derive(Parser, Debug)]
#[command(name = "novajoin-verify")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(long, short = 'c', global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run verification scenarios against the deployment
    Run(commands::run::RunArgs),
    /// Show decoded services and principals of a server
    Services(commands::services::ServicesArgs),
    /// List scenario names
    Scenarios,
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        if let Commands::Scenarios = self.command {
            commands::scenarios::run();
            return Ok(());
        }

        let config = VerifyConfig::load(self.config.as_deref())?;
        match self.command {
            Commands::Run(args) => commands::run::run(args, config).await,
            Commands::Services(args) => commands::services::run(args, config).await,
            Commands::Scenarios => Ok(()),
        }
    }
}
