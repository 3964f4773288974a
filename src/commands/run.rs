//! Run command

use clap::Args;

use super::connect;
use crate::config::VerifyConfig;
use crate::suite::TripleoSuite;
use crate::Result;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario to run, repeatable (runs every scenario if not specified)
    #[arg(long = "scenario", short = 's', value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Address of the overcloud node used for remote checks
    #[arg(long)]
    pub overcloud_address: Option<String>,

    /// Print the report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs, mut config: VerifyConfig) -> Result<()> {
    if let Some(address) = args.overcloud_address {
        config.deployment.overcloud_address = Some(address);
    }

    let verifier = connect(&config).await?;
    let suite = TripleoSuite::new(config.deployment, verifier);

    let report = if args.scenarios.is_empty() {
        suite.run_all().await
    } else {
        suite.run(&args.scenarios).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    report.finish()
}
