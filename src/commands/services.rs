//! Services command
//!
//! Shows what the verifier would check for one server: the decoded service
//! descriptors and the principals derived from them.

use clap::{Args, ValueEnum};

use crate::compute::{self, NovaClient};
use crate::config::{DeploymentConfig, VerifyConfig};
use crate::services::{self, ServiceDescriptor};
use crate::Result;

/// Which metadata encoding to decode
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Encoding {
    /// `compact_services` when present, `managed_service_*` otherwise
    Auto,
    Compact,
    Managed,
}

#[derive(Args, Debug)]
pub struct ServicesArgs {
    /// Server name as known to the compute API
    pub host: String,

    #[arg(long, value_enum, default_value_t = Encoding::Auto)]
    pub encoding: Encoding,
}

pub async fn run(args: ServicesArgs, config: VerifyConfig) -> Result<()> {
    let nova = NovaClient::connect(&config.compute).await?;
    let server_id = compute::resolve_server_id(&nova, &args.host).await?;
    let metadata = compute::get_server_metadata(&nova, &server_id).await?;

    let descriptors = match args.encoding {
        Encoding::Auto => services::decode(&metadata, &args.host)?,
        Encoding::Compact => services::decode_compact(&metadata, &args.host)?,
        Encoding::Managed => services::decode_managed(&metadata, &args.host),
    };

    if descriptors.is_empty() {
        println!("No services found for {}", args.host);
        return Ok(());
    }
    for line in format_services(&descriptors, &config.deployment) {
        println!("{}", line);
    }
    Ok(())
}

fn format_services(descriptors: &[ServiceDescriptor], deployment: &DeploymentConfig) -> Vec<String> {
    let width = descriptors
        .iter()
        .map(|d| d.to_string().len())
        .max()
        .unwrap_or(0);
    descriptors
        .iter()
        .map(|d| {
            format!(
                "{:width$}  {}",
                d.to_string(),
                d.principal(&deployment.domain, &deployment.realm),
                width = width
            )
        })
        .collect()
}
